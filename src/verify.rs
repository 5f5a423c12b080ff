use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use k256::ecdsa::{
    RecoveryId, Signature as EvmSignature, VerifyingKey as EvmVerifyingKey,
};
use tracing::debug;

use crate::crypto::{
    decode_account_address, decode_solana_address, evm_address_from_key,
    evm_personal_sign_hash, parse_evm_address, to_checksum_address,
};
use crate::errors::VerifyError;
use crate::message::canonical_bytes;
use crate::types::{AuthPayload, SignatureScheme, ED25519_SIGNATURE_BYTES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Ok { normalized_address: String },
    Fail { error: VerifyError },
}

impl VerifyResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, VerifyResult::Ok { .. })
    }

    pub fn into_result(self) -> Result<String, VerifyError> {
        match self {
            VerifyResult::Ok { normalized_address } => Ok(normalized_address),
            VerifyResult::Fail { error } => Err(error),
        }
    }

    fn fail(error: VerifyError) -> Self {
        VerifyResult::Fail { error }
    }
}

/// Checks that `signature` over the canonical rendering of `payload` was
/// produced by the key behind `address` under `scheme`.
pub fn verify_signature(
    scheme: SignatureScheme,
    address: &str,
    signature: &str,
    payload: &AuthPayload,
) -> VerifyResult {
    let message = canonical_bytes(payload);
    let result = verify_message(scheme, address, signature, &message);
    if let VerifyResult::Fail { error } = &result {
        debug!(target: "verify", scheme = ?scheme, error = %error, "signature rejected");
    }
    result
}

pub fn verify_message(
    scheme: SignatureScheme,
    address: &str,
    signature: &str,
    message: &[u8],
) -> VerifyResult {
    match scheme {
        SignatureScheme::Evm => verify_evm(address, signature, message),
        SignatureScheme::Ed25519Account => {
            let Some(key) = decode_account_address(address) else {
                return VerifyResult::fail(VerifyError::AddressFormatInvalid);
            };
            verify_ed25519(address, &key, signature, message)
        }
        SignatureScheme::Solana => {
            let Some(key) = decode_solana_address(address) else {
                return VerifyResult::fail(VerifyError::AddressFormatInvalid);
            };
            verify_ed25519(address, &key, signature, message)
        }
    }
}

fn verify_evm(address: &str, signature: &str, message: &[u8]) -> VerifyResult {
    let Some(claimed) = parse_evm_address(address) else {
        return VerifyResult::fail(VerifyError::AddressFormatInvalid);
    };
    let Some(recovered) = recover_evm_signer(signature, message) else {
        return VerifyResult::fail(VerifyError::SignatureMismatch);
    };
    if recovered != claimed {
        return VerifyResult::fail(VerifyError::SignatureMismatch);
    }
    VerifyResult::Ok {
        normalized_address: to_checksum_address(&recovered),
    }
}

fn recover_evm_signer(signature: &str, message: &[u8]) -> Option<[u8; 20]> {
    let sig = signature.trim();
    let body = sig.strip_prefix("0x").unwrap_or(sig);
    let bytes = hex::decode(body).ok()?;
    if bytes.len() != 65 {
        return None;
    }

    let v = match bytes[64] {
        0 | 1 => bytes[64],
        27 | 28 => bytes[64] - 27,
        _ => return None,
    };
    let recovery_id = RecoveryId::from_byte(v)?;
    let rs = EvmSignature::from_slice(&bytes[..64]).ok()?;

    let digest = evm_personal_sign_hash(message);
    let vk = EvmVerifyingKey::recover_from_prehash(&digest, &rs, recovery_id).ok()?;
    Some(evm_address_from_key(&vk))
}

/// Base64 first; hex only when base64 does not give exactly 64 bytes.
pub fn decode_ed25519_signature(signature: &str) -> Result<[u8; 64], VerifyError> {
    let s = signature.trim();

    if let Ok(bytes) = BASE64_STANDARD.decode(s) {
        if let Ok(sig) = <[u8; ED25519_SIGNATURE_BYTES]>::try_from(bytes.as_slice()) {
            return Ok(sig);
        }
    }

    let hex_body = s.strip_prefix("0x").unwrap_or(s);
    if let Ok(bytes) = hex::decode(hex_body) {
        if let Ok(sig) = <[u8; ED25519_SIGNATURE_BYTES]>::try_from(bytes.as_slice()) {
            return Ok(sig);
        }
    }

    Err(VerifyError::SignatureLengthInvalid)
}

/// Strict ed25519 check: small-order keys and non-canonical `R` are refused.
pub fn verify_with_pubkey(sig: &[u8; 64], msg: &[u8], pubkey: &[u8; 32]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    vk.verify_strict(msg, &Signature::from_bytes(sig)).is_ok()
}

fn verify_ed25519(address: &str, key: &[u8; 32], signature: &str, message: &[u8]) -> VerifyResult {
    let sig = match decode_ed25519_signature(signature) {
        Ok(sig) => sig,
        Err(error) => return VerifyResult::fail(error),
    };
    if !verify_with_pubkey(&sig, message, key) {
        return VerifyResult::fail(VerifyError::SignatureMismatch);
    }
    VerifyResult::Ok {
        normalized_address: address.to_string(),
    }
}
