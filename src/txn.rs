//! Payment transactions for account-chain ownership proofs.
//!
//! Encoding is canonical msgpack: map keys sorted, zero-valued fields
//! omitted, byte fields as `bin`. Struct fields are declared in key order so
//! `rmp_serde::to_vec_named` produces the canonical form directly.

use data_encoding::BASE32_NOPAD;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::crypto::sha512_256;
use crate::errors::AuthError;

pub const TX_SIGN_PREFIX: &[u8] = b"TX";
pub const PAYMENT_TYPE: &str = "pay";

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Unknown keys fail decoding: re-encoding must reproduce the signed bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentTransaction {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub amt: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fee: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fv: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gen: String,
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub gh: Vec<u8>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub lv: u64,
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub note: Vec<u8>,
    #[serde(default, with = "serde_bytes", skip_serializing_if = "Vec::is_empty")]
    pub rcv: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub snd: Vec<u8>,
    #[serde(rename = "type")]
    pub tx_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedTransaction {
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
    pub txn: PaymentTransaction,
}

impl PaymentTransaction {
    /// Zero-value payment from `sender` to itself carrying `note`.
    pub fn self_payment(sender: [u8; 32], note: Vec<u8>, first_valid: u64, genesis_id: &str) -> Self {
        Self {
            amt: 0,
            fee: 1_000,
            fv: first_valid,
            gen: genesis_id.to_string(),
            gh: Vec::new(),
            lv: first_valid + 1_000,
            note,
            rcv: sender.to_vec(),
            snd: sender.to_vec(),
            tx_type: PAYMENT_TYPE.to_string(),
        }
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>, AuthError> {
        rmp_serde::to_vec_named(self).map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Bytes covered by the sender's signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, AuthError> {
        let body = self.canonical_bytes()?;
        let mut out = Vec::with_capacity(TX_SIGN_PREFIX.len() + body.len());
        out.extend_from_slice(TX_SIGN_PREFIX);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn tx_id(&self) -> Result<String, AuthError> {
        Ok(BASE32_NOPAD.encode(&sha512_256(&self.signing_bytes()?)))
    }

    pub fn sign(self, key: &SigningKey) -> Result<SignedTransaction, AuthError> {
        let sig = key.sign(&self.signing_bytes()?).to_bytes().to_vec();
        Ok(SignedTransaction { sig, txn: self })
    }
}

impl SignedTransaction {
    pub fn decode(bytes: &[u8]) -> Result<Self, AuthError> {
        rmp_serde::from_slice(bytes).map_err(|e| AuthError::TransactionDecode(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, AuthError> {
        rmp_serde::to_vec_named(self).map_err(|e| AuthError::Internal(e.to_string()))
    }
}
