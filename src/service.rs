use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::derive::{KeyDeriver, DEFAULT_DERIVATION_DOMAIN};
use crate::errors::AuthError;
use crate::identity::IdentityTokenValidator;
use crate::links::LinkRegistry;
use crate::nonce::NonceRegistry;
use crate::ownership::{ChallengeToken, OwnershipProofService};
use crate::persistence::external_identity_key;
use crate::session::SessionManager;
use crate::store::{Clock, KvStore};
use crate::types::{
    AccountLink, AuthPayload, Chain, DerivedFrom, Nonce, ProfileId, Session, SessionMeta,
    SignatureScheme, Timestamp, CHALLENGE_TTL_SECS, NONCE_TTL_SECS, SESSION_TOKEN_BYTES,
    SESSION_TTL_SECS,
};
use crate::verify::{verify_signature, VerifyResult};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub nonce_ttl: Duration,
    pub challenge_ttl: Duration,
    pub session_ttl: Duration,
    pub derivation_domain: String,
    pub statement: Option<String>,
    pub domain: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            nonce_ttl: Duration::seconds(NONCE_TTL_SECS),
            challenge_ttl: Duration::seconds(CHALLENGE_TTL_SECS),
            session_ttl: Duration::seconds(SESSION_TTL_SECS),
            derivation_domain: DEFAULT_DERIVATION_DOMAIN.to_string(),
            statement: None,
            domain: None,
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            nonce_ttl: Duration::seconds(cfg.nonce_ttl_secs),
            challenge_ttl: Duration::seconds(cfg.challenge_ttl_secs),
            session_ttl: Duration::seconds(cfg.session_ttl_secs),
            derivation_domain: cfg.derivation_domain.clone(),
            statement: cfg.statement.clone(),
            domain: cfg.domain.clone(),
        }
    }
}

/// Signed login request for the wallet-signature protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureLogin {
    pub chain: Chain,
    pub address: String,
    pub signature: String,
    pub nonce: String,
    pub payload: AuthPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub profile_id: ProfileId,
    pub session: Session,
    /// Bearer token to hand to the client. Only its hash is stored.
    pub token: String,
    /// Checksummed address for EVM logins, the input address otherwise.
    /// `None` for identity-token logins.
    pub address: Option<String>,
    pub new_profile: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub session: Session,
    pub links: Vec<AccountLink>,
}

/// The login and address-link protocols over one store.
pub struct AuthService {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
    nonces: NonceRegistry,
    sessions: SessionManager,
    links: LinkRegistry,
    ownership: OwnershipProofService,
    deriver: KeyDeriver,
    validator: Option<Arc<IdentityTokenValidator>>,
}

impl AuthService {
    /// Uses a random challenge secret; see [`AuthService::with_challenge_secret`].
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, settings: ServiceSettings) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);

        Self {
            nonces: NonceRegistry::with_ttl(store.clone(), clock.clone(), settings.nonce_ttl),
            sessions: SessionManager::new(store.clone(), clock.clone()),
            links: LinkRegistry::new(store.clone(), clock.clone()),
            ownership: OwnershipProofService::with_ttl(
                &secret,
                clock.clone(),
                settings.challenge_ttl,
            ),
            deriver: KeyDeriver::new(settings.derivation_domain.clone()),
            validator: None,
            store,
            clock,
            settings,
        }
    }

    pub fn with_challenge_secret(mut self, secret: &[u8]) -> Self {
        self.ownership =
            OwnershipProofService::with_ttl(secret, self.clock.clone(), self.settings.challenge_ttl);
        self
    }

    pub fn with_identity_validator(mut self, validator: Arc<IdentityTokenValidator>) -> Self {
        self.sessions = SessionManager::new(self.store.clone(), self.clock.clone())
            .with_validator(validator.clone());
        self.validator = Some(validator);
        self
    }

    /// Service configured from `cfg`. Identity-token login stays disabled
    /// until a validator is attached.
    pub fn from_config(
        cfg: &Config,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let service = Self::new(store, clock, ServiceSettings::from(cfg));
        match cfg
            .challenge_secret_bytes()
            .map_err(|e| AuthError::Internal(e.to_string()))?
        {
            Some(secret) => Ok(service.with_challenge_secret(&secret)),
            None => {
                warn!(target: "service", "no challenge_secret configured, link challenges will not survive a restart");
                Ok(service)
            }
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn derivation_domain(&self) -> &str {
        self.deriver.domain()
    }

    pub fn identity_enabled(&self) -> bool {
        self.validator.is_some()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn request_nonce(&self, chain: Chain, address: &str) -> Result<Nonce, AuthError> {
        self.nonces.issue(chain, address)
    }

    /// Payload the client is expected to sign for `nonce`.
    pub fn message_template(&self, nonce: &Nonce) -> AuthPayload {
        AuthPayload {
            nonce: nonce.token.clone(),
            issued_at: self.clock.now(),
            expires_at: nonce.expires_at,
            domain: self.settings.domain.clone(),
            statement: self.settings.statement.clone(),
        }
    }

    pub fn login_with_signature(
        &self,
        req: &SignatureLogin,
        meta: &SessionMeta,
    ) -> Result<LoginOutcome, AuthError> {
        let address = match verify_signature(
            req.chain.scheme(),
            &req.address,
            &req.signature,
            &req.payload,
        ) {
            VerifyResult::Ok { normalized_address } => normalized_address,
            VerifyResult::Fail { error } => {
                warn!(target: "service", chain = %req.chain, error = %error, "signature login rejected");
                return Err(error.into());
            }
        };

        if req.payload.nonce != req.nonce {
            return Err(AuthError::NonceMismatch);
        }
        if self.settings.domain.is_some() && req.payload.domain != self.settings.domain {
            return Err(AuthError::BadRequest("payload domain does not match"));
        }
        if self.clock.now() >= req.payload.expires_at {
            return Err(AuthError::PayloadExpired);
        }

        // A valid signature over a replayed payload stops here.
        self.nonces
            .consume_and_validate(req.chain, &req.address, &req.nonce)?;

        let (profile_id, new_profile) = self.resolve_or_create_profile(req.chain, &address)?;
        let (session, token) = self.open_session(&profile_id, meta, None)?;

        info!(target: "service", profile_id = %profile_id, chain = %req.chain, new_profile, "signature login");
        Ok(LoginOutcome {
            profile_id,
            session,
            token,
            address: Some(address),
            new_profile,
        })
    }

    fn resolve_or_create_profile(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<(ProfileId, bool), AuthError> {
        if let Some(pid) = self.links.owner_of(chain, address)? {
            return Ok((pid, false));
        }

        let candidate = Uuid::now_v7().to_string();
        match self.links.link(&candidate, chain, address, true, None) {
            Ok(_) => Ok((candidate, true)),
            // lost a race with a concurrent first login for this address
            Err(AuthError::AddressAlreadyLinked) => self
                .links
                .owner_of(chain, address)?
                .map(|pid| (pid, false))
                .ok_or_else(|| AuthError::Internal("owner vanished after conflict".into())),
            Err(e) => Err(e),
        }
    }

    fn open_session(
        &self,
        profile_id: &str,
        meta: &SessionMeta,
        external: Option<(&str, &str)>,
    ) -> Result<(Session, String), AuthError> {
        let (token, external_id) = match external {
            Some((provider_token, external_id)) => (provider_token.to_string(), Some(external_id)),
            None => {
                let mut raw = [0u8; SESSION_TOKEN_BYTES];
                OsRng.fill_bytes(&mut raw);
                (URL_SAFE_NO_PAD.encode(raw), None)
            }
        };
        let session =
            self.sessions
                .create(profile_id, &token, self.settings.session_ttl, meta, external_id)?;
        Ok((session, token))
    }

    /// Blocks on the identity provider; run it off the async workers.
    pub fn login_with_identity_token(
        &self,
        token: &str,
        meta: &SessionMeta,
    ) -> Result<LoginOutcome, AuthError> {
        let validator = self.validator.as_ref().ok_or(AuthError::IdentityUnavailable)?;
        let record = validator
            .validate_default(token)
            .ok_or(AuthError::IdentityUnavailable)?;

        let key = external_identity_key(&record.external_user_id);
        let candidate = Uuid::now_v7().to_string();
        let (profile_id, new_profile) =
            match self.store.put_if_absent(&key, candidate.clone().into_bytes())? {
                Some(existing) => (
                    String::from_utf8(existing).map_err(|e| AuthError::CorruptRecord {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?,
                    false,
                ),
                None => (candidate, true),
            };

        let (session, token) =
            self.open_session(&profile_id, meta, Some((token, &record.external_user_id)))?;

        info!(target: "service", profile_id = %profile_id, auth_method = %record.auth_method, new_profile, "identity token login");
        Ok(LoginOutcome {
            profile_id,
            session,
            token,
            address: None,
            new_profile,
        })
    }

    /// May block on the identity provider for externally issued sessions.
    pub fn refresh(&self, token: &str) -> Result<Timestamp, AuthError> {
        self.sessions.refresh(token)
    }

    pub fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.revoke_token(token)
    }

    /// Sweeps expired nonces and sessions. Returns `(nonces, sessions)` removed.
    pub fn purge_expired(&self) -> Result<(usize, usize), AuthError> {
        Ok((self.nonces.purge_expired()?, self.sessions.purge_expired()?))
    }

    pub fn current_session(&self, token: &str) -> Result<Option<SessionView>, AuthError> {
        let Some(session) = self.sessions.resolve(token)? else {
            return Ok(None);
        };
        let links = self.links.links_for_profile(&session.profile_id)?;
        Ok(Some(SessionView { session, links }))
    }

    pub fn begin_link(&self, profile_id: &str) -> Result<ChallengeToken, AuthError> {
        let primary = self
            .links
            .primary_link(profile_id)?
            .ok_or(AuthError::ProfileNotFound)?;
        self.ownership.issue_challenge(profile_id, &primary.address)
    }

    pub fn complete_link(
        &self,
        profile_id: &str,
        chain: Chain,
        claimed_address: &str,
        challenge_token: &str,
        signed_tx: &[u8],
        derived_from: Option<DerivedFrom>,
    ) -> Result<AccountLink, AuthError> {
        if chain.scheme() != SignatureScheme::Ed25519Account {
            return Err(AuthError::UnsupportedChain(chain.to_string()));
        }

        let receipt = self.ownership.verify_ownership_proof(
            profile_id,
            claimed_address,
            challenge_token,
            signed_tx,
        )?;
        if let Some(source) = &derived_from {
            // provenance must name an address this profile already owns
            if self.links.owner_of(source.chain, &source.address)?.as_deref() != Some(profile_id) {
                warn!(target: "service", profile_id, chain = %source.chain, "derived_from not owned by linking profile");
                return Err(AuthError::ProfileMismatch);
            }
        }
        let link = self
            .links
            .link(profile_id, chain, &receipt.claimed_address, false, derived_from)?;

        info!(target: "service", profile_id, chain = %chain, tx_id = %receipt.tx_id, "address ownership proven");
        Ok(link)
    }
}
