use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NONCE_TTL_SECS: i64 = 300;
pub const CHALLENGE_TTL_SECS: i64 = 600;
pub const SESSION_TTL_SECS: i64 = 86_400;
pub const PURGE_INTERVAL_SECS: i64 = 60;

pub const NONCE_BYTES: usize = 32;
pub const SESSION_TOKEN_BYTES: usize = 32;
pub const ED25519_SIGNATURE_BYTES: usize = 64;
pub const PRIMARY_KEY_BYTES: usize = 32;

pub const IDENTITY_TIMEOUT_MS: u64 = 5_000;
pub const IDENTITY_RETRIES: u32 = 2;

pub type ProfileId = String;
pub type SessionId = String;
pub type Timestamp = DateTime<Utc>;

/// Signature scheme a chain family authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    Evm,
    Ed25519Account,
    Solana,
}

/// Chain discriminator supplied by the caller. The scheme comes from this
/// table only, never from the address string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Base,
    Voi,
    Algorand,
    Solana,
}

impl Chain {
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Chain::Ethereum | Chain::Base => SignatureScheme::Evm,
            Chain::Voi | Chain::Algorand => SignatureScheme::Ed25519Account,
            Chain::Solana => SignatureScheme::Solana,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Voi => "voi",
            Chain::Algorand => "algorand",
            Chain::Solana => "solana",
        }
    }

    /// Storage key form of an address on this chain. EVM hex is
    /// case-insensitive, the other encodings are not.
    pub fn address_key(&self, address: &str) -> String {
        match self.scheme() {
            SignatureScheme::Evm => address.trim().to_ascii_lowercase(),
            _ => address.trim().to_string(),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "base" => Ok(Chain::Base),
            "voi" => Ok(Chain::Voi),
            "algorand" | "algo" => Ok(Chain::Algorand),
            "solana" | "sol" => Ok(Chain::Solana),
            other => Err(format!("unknown chain: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    pub chain: Chain,
    pub address: String,
    pub token: String,
    pub expires_at: Timestamp,
}

/// Semantic content a client signs at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub nonce: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub profile_id: ProfileId,
    pub external_identity_id: Option<String>,
    pub token_hash: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    /// Full lifetime granted on create and on every refresh.
    pub ttl_ms: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFrom {
    pub chain: Chain,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLink {
    pub profile_id: ProfileId,
    pub chain: Chain,
    pub address: String,
    pub is_primary: bool,
    pub derived_from_chain: Option<Chain>,
    pub derived_from_address: Option<String>,
    pub linked_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub external_user_id: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub auth_method: String,
}
