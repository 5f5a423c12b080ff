use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::sha256_hex;
use crate::errors::AuthError;
use crate::identity::IdentityTokenValidator;
use crate::persistence::{
    decode_row, encode_row, session_id_key, session_token_key, session_token_prefix,
};
use crate::store::{Clock, KvStore};
use crate::types::{Session, SessionId, SessionMeta, Timestamp};

/// One-way hash under which a bearer token is stored.
pub fn hash_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

pub struct SessionManager {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    validator: Option<Arc<IdentityTokenValidator>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            validator: None,
        }
    }

    /// Needed to refresh sessions whose token came from the identity provider.
    pub fn with_validator(mut self, validator: Arc<IdentityTokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn create(
        &self,
        profile_id: &str,
        opaque_token: &str,
        ttl: Duration,
        meta: &SessionMeta,
        external_identity_id: Option<&str>,
    ) -> Result<Session, AuthError> {
        if opaque_token.is_empty() {
            return Err(AuthError::BadRequest("session token required"));
        }
        if ttl < Duration::milliseconds(1) {
            return Err(AuthError::BadRequest("session ttl must be at least 1ms"));
        }

        let now = self.clock.now();
        let session = Session {
            id: Uuid::now_v7().to_string(),
            profile_id: profile_id.to_string(),
            external_identity_id: external_identity_id.map(str::to_string),
            token_hash: hash_token(opaque_token),
            created_at: now,
            expires_at: now + ttl,
            ttl_ms: ttl.num_milliseconds(),
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
        };

        let token_key = session_token_key(&session.token_hash);
        // Provider tokens can be presented twice; drop the older row's index.
        if let Some(prev) = self.store.take(&token_key)? {
            let prev: Session = decode_row(&token_key, &prev)?;
            self.store.delete(&session_id_key(&prev.id))?;
        }
        self.store
            .put(&token_key, encode_row(&token_key, &session)?)?;
        self.store.put(
            &session_id_key(&session.id),
            session.token_hash.clone().into_bytes(),
        )?;

        info!(target: "session", session_id = %session.id, profile_id, "session created");
        Ok(session)
    }

    /// Unexpired session for `opaque_token`. An expired row is deleted on
    /// sight and reads as absent.
    pub fn resolve(&self, opaque_token: &str) -> Result<Option<Session>, AuthError> {
        let key = session_token_key(&hash_token(opaque_token));
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let session: Session = decode_row(&key, &bytes)?;
        if self.clock.now() >= session.expires_at {
            self.drop_expired(&key, &bytes, &session)?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Removes every session past its expiry. Returns how many went.
    pub fn purge_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let mut removed = 0;
        for (key, bytes) in self.store.scan_prefix(&session_token_prefix())? {
            let session: Session = decode_row(&key, &bytes)?;
            if now >= session.expires_at && self.drop_expired(&key, &bytes, &session)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(target: "session", removed, "purged expired sessions");
        }
        Ok(removed)
    }

    // A row refreshed since it was read is left alone.
    fn drop_expired(&self, key: &str, bytes: &[u8], session: &Session) -> Result<bool, AuthError> {
        if !self.store.delete_if_eq(key, bytes)? {
            return Ok(false);
        }
        self.store.delete(&session_id_key(&session.id))?;
        debug!(target: "session", session_id = %session.id, "expired session removed");
        Ok(true)
    }

    /// Extends the session by its full ttl from now. Externally issued
    /// tokens are re-validated first and must still name the same user.
    pub fn refresh(&self, opaque_token: &str) -> Result<Timestamp, AuthError> {
        let mut session = self
            .resolve(opaque_token)?
            .ok_or(AuthError::SessionNotFound)?;

        if let Some(expected) = session.external_identity_id.as_deref() {
            let validator = self.validator.as_ref().ok_or(AuthError::IdentityUnavailable)?;
            let record = validator
                .validate_default(opaque_token)
                .ok_or(AuthError::IdentityUnavailable)?;
            if record.external_user_id != expected {
                warn!(target: "session", session_id = %session.id, "provider identity changed under session");
                return Err(AuthError::UserMismatch);
            }
        }

        let previous = session.expires_at;
        let extended = self.clock.now() + Duration::milliseconds(session.ttl_ms);
        // A refresh never shortens or keeps the old expiry.
        session.expires_at = extended.max(previous + Duration::milliseconds(1));

        let key = session_token_key(&session.token_hash);
        if !self.store.replace(&key, encode_row(&key, &session)?)? {
            // revoked while we were validating
            return Err(AuthError::SessionNotFound);
        }

        debug!(target: "session", session_id = %session.id, expires_at = %session.expires_at, "session refreshed");
        Ok(session.expires_at)
    }

    /// Deleting an unknown or already revoked session is not an error.
    pub fn revoke(&self, session_id: &SessionId) -> Result<(), AuthError> {
        if let Some(hash) = self.store.take(&session_id_key(session_id))? {
            let token_hash = String::from_utf8(hash).map_err(|e| AuthError::CorruptRecord {
                key: session_id_key(session_id),
                reason: e.to_string(),
            })?;
            self.store.delete(&session_token_key(&token_hash))?;
            info!(target: "session", session_id = %session_id, "session revoked");
        }
        Ok(())
    }

    pub fn revoke_token(&self, opaque_token: &str) -> Result<(), AuthError> {
        let key = session_token_key(&hash_token(opaque_token));
        if let Some(bytes) = self.store.take(&key)? {
            let session: Session = decode_row(&key, &bytes)?;
            self.store.delete(&session_id_key(&session.id))?;
            info!(target: "session", session_id = %session.id, "session revoked");
        }
        Ok(())
    }
}
