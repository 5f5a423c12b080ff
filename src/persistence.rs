use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::AuthError;
use crate::store::KvStore;
use crate::types::Chain;

const KEY_VERSION: &str = "v1";

pub fn nonce_prefix() -> String {
    format!("{KEY_VERSION}/nonce/")
}

pub fn nonce_key(chain: Chain, address: &str) -> String {
    format!("{}{chain}/{}", nonce_prefix(), chain.address_key(address))
}

pub fn session_token_prefix() -> String {
    format!("{KEY_VERSION}/session/token/")
}

pub fn session_token_key(token_hash: &str) -> String {
    format!("{}{token_hash}", session_token_prefix())
}

pub fn session_id_key(session_id: &str) -> String {
    format!("{KEY_VERSION}/session/id/{session_id}")
}

pub fn owner_key(chain: Chain, address: &str) -> String {
    format!("{KEY_VERSION}/owner/{chain}/{}", chain.address_key(address))
}

pub fn link_prefix(profile_id: &str) -> String {
    format!("{KEY_VERSION}/link/{profile_id}/")
}

pub fn link_key(profile_id: &str, chain: Chain, address: &str) -> String {
    format!("{}{chain}/{}", link_prefix(profile_id), chain.address_key(address))
}

pub fn external_identity_key(external_user_id: &str) -> String {
    format!("{KEY_VERSION}/extid/{external_user_id}")
}

pub fn encode_row<T: Serialize>(key: &str, row: &T) -> Result<Vec<u8>, AuthError> {
    bincode::serialize(row).map_err(|e| AuthError::CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_row<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, AuthError> {
    bincode::deserialize(bytes).map_err(|e| AuthError::CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn load_row<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>, AuthError> {
    match store.get(key)? {
        Some(bytes) => decode_row(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub fn save_row<T: Serialize>(store: &dyn KvStore, key: &str, row: &T) -> Result<(), AuthError> {
    let bytes = encode_row(key, row)?;
    store.put(key, bytes)?;
    Ok(())
}
