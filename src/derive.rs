use std::fmt;

use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{encode_account_address, sha256};
use crate::errors::AuthError;
use crate::types::{Chain, SignatureScheme, PRIMARY_KEY_BYTES};

pub const DEFAULT_DERIVATION_DOMAIN: &str = "crossauth/derived-account/voi/v1";

#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKeypair {
    pub address: String,
    /// `seed || public_key`, the account-chain wallet format.
    pub secret_key: Zeroizing<[u8; 64]>,
}

impl fmt::Debug for DerivedKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeypair")
            .field("address", &self.address)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl DerivedKeypair {
    pub fn signing_key(&self) -> SigningKey {
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&self.secret_key[..32]);
        SigningKey::from_bytes(&seed)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct DerivedAccount {
    pub derived_address: String,
    pub derived_secret_key: Zeroizing<[u8; 64]>,
    pub source_chain: Chain,
    pub source_key_fingerprint: String,
}

impl fmt::Debug for DerivedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedAccount")
            .field("derived_address", &self.derived_address)
            .field("derived_secret_key", &"<redacted>")
            .field("source_chain", &self.source_chain)
            .field("source_key_fingerprint", &self.source_key_fingerprint)
            .finish()
    }
}

/// Deterministic secondary-chain keys from a primary-chain private key.
///
/// The domain string scopes the derivation to one application: the same
/// primary key under another domain yields an unrelated account.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    domain: String,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_DERIVATION_DOMAIN)
    }
}

impl KeyDeriver {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn derive(&self, primary_key: &[u8]) -> Result<DerivedKeypair, AuthError> {
        if primary_key.len() != PRIMARY_KEY_BYTES {
            return Err(AuthError::InvalidKeyLength {
                expected: PRIMARY_KEY_BYTES,
                actual: primary_key.len(),
            });
        }

        let hk = Hkdf::<Sha256>::new(None, primary_key);
        let mut seed = Zeroizing::new([0u8; 32]);
        hk.expand(self.domain.as_bytes(), &mut seed[..])
            .map_err(|_| AuthError::Internal("hkdf expand failed".into()))?;

        let sk = SigningKey::from_bytes(&seed);
        let public = sk.verifying_key().to_bytes();

        let mut secret_key = Zeroizing::new([0u8; 64]);
        secret_key[..32].copy_from_slice(&seed[..]);
        secret_key[32..].copy_from_slice(&public);

        Ok(DerivedKeypair {
            address: encode_account_address(&public),
            secret_key,
        })
    }

    pub fn derive_account(
        &self,
        source_chain: Chain,
        primary_key: &[u8],
    ) -> Result<DerivedAccount, AuthError> {
        let kp = self.derive(primary_key)?;
        let public = primary_public_key(source_chain, primary_key)?;
        Ok(DerivedAccount {
            derived_address: kp.address,
            derived_secret_key: kp.secret_key,
            source_chain,
            source_key_fingerprint: key_fingerprint(&public),
        })
    }
}

/// Public key of a primary-chain private key, in the chain's native form
/// (uncompressed SEC1 for EVM, raw 32 bytes for the ed25519 chains).
pub fn primary_public_key(chain: Chain, primary_key: &[u8]) -> Result<Vec<u8>, AuthError> {
    let key: [u8; PRIMARY_KEY_BYTES] =
        primary_key.try_into().map_err(|_| AuthError::InvalidKeyLength {
            expected: PRIMARY_KEY_BYTES,
            actual: primary_key.len(),
        })?;
    match chain.scheme() {
        SignatureScheme::Evm => {
            let sk = k256::ecdsa::SigningKey::from_slice(&key)
                .map_err(|_| AuthError::BadRequest("primary key is not a valid secp256k1 scalar"))?;
            Ok(sk.verifying_key().to_encoded_point(false).as_bytes().to_vec())
        }
        SignatureScheme::Ed25519Account | SignatureScheme::Solana => {
            Ok(SigningKey::from_bytes(&key).verifying_key().to_bytes().to_vec())
        }
    }
}

/// One-way label for a primary public key, safe to persist next to a
/// derived account.
pub fn key_fingerprint(public_key: &[u8]) -> String {
    hex::encode(&sha256(public_key)[..16])
}
