use std::sync::Arc;

use chrono::Duration;
use rand_core::{OsRng, RngCore};
use tracing::{debug, info};

use crate::crypto::constant_time_eq;
use crate::errors::AuthError;
use crate::persistence::{decode_row, encode_row, nonce_key, nonce_prefix};
use crate::store::{Clock, KvStore};
use crate::types::{Chain, Nonce, NONCE_BYTES, NONCE_TTL_SECS};

pub fn random_token_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// One live login nonce per `(chain, address)`.
pub struct NonceRegistry {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl NonceRegistry {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(store, clock, Duration::seconds(NONCE_TTL_SECS))
    }

    pub fn with_ttl(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Replaces any earlier nonce for the same key.
    pub fn issue(&self, chain: Chain, address: &str) -> Result<Nonce, AuthError> {
        if address.trim().is_empty() {
            return Err(AuthError::BadRequest("address required"));
        }

        let nonce = Nonce {
            chain,
            address: address.trim().to_string(),
            token: random_token_hex(NONCE_BYTES),
            expires_at: self.clock.now() + self.ttl,
        };

        let key = nonce_key(chain, address);
        self.store.put(&key, encode_row(&key, &nonce)?)?;
        debug!(target: "nonce", chain = %chain, expires_at = %nonce.expires_at, "issued nonce");
        Ok(nonce)
    }

    /// Atomically removes the nonce, then judges it. Any attempt burns the
    /// row, so a second call for the same challenge always sees
    /// `NonceNotFound`.
    pub fn consume_and_validate(
        &self,
        chain: Chain,
        address: &str,
        provided_token: &str,
    ) -> Result<(), AuthError> {
        let key = nonce_key(chain, address);
        let Some(bytes) = self.store.take(&key)? else {
            return Err(AuthError::NonceNotFound);
        };
        let nonce: Nonce = decode_row(&key, &bytes)?;

        if !constant_time_eq(nonce.token.as_bytes(), provided_token.as_bytes()) {
            return Err(AuthError::NonceMismatch);
        }
        if self.clock.now() >= nonce.expires_at {
            return Err(AuthError::NonceExpired);
        }

        debug!(target: "nonce", chain = %chain, "consumed nonce");
        Ok(())
    }

    /// Drops nonces that expired without being consumed. Returns how many
    /// rows were removed.
    pub fn purge_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let mut removed = 0;
        for (key, bytes) in self.store.scan_prefix(&nonce_prefix())? {
            let nonce: Nonce = decode_row(&key, &bytes)?;
            if now >= nonce.expires_at && self.store.delete_if_eq(&key, &bytes)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(target: "nonce", removed, "purged expired nonces");
        }
        Ok(removed)
    }
}
