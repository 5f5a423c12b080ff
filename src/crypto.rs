use data_encoding::BASE32_NOPAD;
use k256::ecdsa::VerifyingKey as EvmVerifyingKey;
use sha2::{Digest, Sha256, Sha512_256};
use sha3::Keccak256;
use subtle::ConstantTimeEq;

pub type Hash256 = [u8; 32];
pub type EvmAddress = [u8; 20];

pub const ACCOUNT_ADDRESS_LEN: usize = 58;
const ACCOUNT_CHECKSUM_LEN: usize = 4;

pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub fn keccak256(data: &[u8]) -> Hash256 {
    Keccak256::digest(data).into()
}

pub fn sha512_256(data: &[u8]) -> Hash256 {
    Sha512_256::digest(data).into()
}

/// Equality whose running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// EIP-191 `personal_sign` digest.
pub fn evm_personal_sign_hash(message: &[u8]) -> Hash256 {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

pub fn parse_evm_address(s: &str) -> Option<EvmAddress> {
    let s = s.trim();
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if body.len() != 40 {
        return None;
    }
    let bytes = hex::decode(body).ok()?;
    bytes.try_into().ok()
}

pub fn evm_address_from_key(vk: &EvmVerifyingKey) -> EvmAddress {
    let point = vk.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

/// EIP-55 mixed-case rendering.
pub fn to_checksum_address(addr: &EvmAddress) -> String {
    let lower = hex::encode(addr);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn account_checksum(public_key: &[u8; 32]) -> [u8; ACCOUNT_CHECKSUM_LEN] {
    let digest = sha512_256(public_key);
    let mut out = [0u8; ACCOUNT_CHECKSUM_LEN];
    out.copy_from_slice(&digest[32 - ACCOUNT_CHECKSUM_LEN..]);
    out
}

/// Account-chain address: base32 of `key || checksum`, no padding.
pub fn encode_account_address(public_key: &[u8; 32]) -> String {
    let mut raw = Vec::with_capacity(32 + ACCOUNT_CHECKSUM_LEN);
    raw.extend_from_slice(public_key);
    raw.extend_from_slice(&account_checksum(public_key));
    BASE32_NOPAD.encode(&raw)
}

pub fn decode_account_address(address: &str) -> Option<[u8; 32]> {
    if address.len() != ACCOUNT_ADDRESS_LEN {
        return None;
    }
    let raw = BASE32_NOPAD.decode(address.as_bytes()).ok()?;
    if raw.len() != 32 + ACCOUNT_CHECKSUM_LEN {
        return None;
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&raw[..32]);
    if raw[32..] != account_checksum(&key) {
        return None;
    }
    Some(key)
}

pub fn encode_solana_address(public_key: &[u8; 32]) -> String {
    bs58::encode(public_key).into_string()
}

pub fn decode_solana_address(address: &str) -> Option<[u8; 32]> {
    let raw = bs58::decode(address).into_vec().ok()?;
    raw.try_into().ok()
}
