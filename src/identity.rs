use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{IdentityRecord, IDENTITY_RETRIES, IDENTITY_TIMEOUT_MS};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,
    #[error("provider rejected the token")]
    Rejected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Decode(String),
}

/// Request/response contract with the external identity provider.
///
/// Implementations are built once and injected; the validator holds an
/// `Arc` for as long as it lives.
pub trait IdentityProviderClient: Send + Sync {
    fn authenticate(&self, token: &str, timeout: Duration)
        -> Result<IdentityRecord, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(IDENTITY_TIMEOUT_MS),
            retries: IDENTITY_RETRIES,
        }
    }
}

impl ValidateOptions {
    /// Upper bound on how long one `validate` call can block.
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.retries + 1)
    }
}

/// Runs `op` up to `attempts` times back to back and returns the first
/// success, or the last error. No delay between attempts.
pub fn retry_bounded<T, E, F>(attempts: u32, mut op: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(target: "identity", attempt, error = %e, "attempt failed, retrying");
                attempt += 1;
            }
        }
    }
}

pub struct IdentityTokenValidator {
    client: Arc<dyn IdentityProviderClient>,
    options: ValidateOptions,
}

impl IdentityTokenValidator {
    pub fn new(client: Arc<dyn IdentityProviderClient>) -> Self {
        Self::with_options(client, ValidateOptions::default())
    }

    pub fn with_options(client: Arc<dyn IdentityProviderClient>, options: ValidateOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> ValidateOptions {
        self.options
    }

    pub fn validate_default(&self, token: &str) -> Option<IdentityRecord> {
        self.validate(token, self.options)
    }

    /// `None` covers both an unreachable provider and a rejected token;
    /// callers cannot and should not tell them apart here.
    pub fn validate(&self, token: &str, opts: ValidateOptions) -> Option<IdentityRecord> {
        if token.trim().is_empty() {
            return None;
        }

        let outcome = retry_bounded(opts.retries + 1, |_| {
            let record = self.client.authenticate(token, opts.timeout)?;
            if record.external_user_id.is_empty() {
                return Err(ProviderError::Decode("empty externalUserId".into()));
            }
            Ok(record)
        });

        match outcome {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(target: "identity", error = %e, attempts = opts.retries + 1, "identity token not validated");
                None
            }
        }
    }
}

/// Scripted provider for tests and local runs. Queued failures are
/// returned first, one per call; after that known tokens succeed and
/// everything else is rejected.
#[derive(Default)]
pub struct MockIdentityClient {
    records: Mutex<BTreeMap<String, IdentityRecord>>,
    scripted: Mutex<VecDeque<ProviderError>>,
    calls: AtomicU32,
}

impl MockIdentityClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: &str, record: IdentityRecord) -> Self {
        self.set_record(token, record);
        self
    }

    pub fn set_record(&self, token: &str, record: IdentityRecord) {
        if let Ok(mut m) = self.records.lock() {
            m.insert(token.to_string(), record);
        }
    }

    pub fn forget_token(&self, token: &str) {
        if let Ok(mut m) = self.records.lock() {
            m.remove(token);
        }
    }

    pub fn fail_next(&self, error: ProviderError) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(error);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityProviderClient for MockIdentityClient {
    fn authenticate(
        &self,
        token: &str,
        _timeout: Duration,
    ) -> Result<IdentityRecord, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(e) = self.scripted.lock().ok().and_then(|mut q| q.pop_front()) {
            return Err(e);
        }

        self.records
            .lock()
            .map_err(|e| ProviderError::Transport(e.to_string()))?
            .get(token)
            .cloned()
            .ok_or(ProviderError::Rejected)
    }
}

#[cfg(feature = "identity-http")]
pub struct ReqwestIdentityClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "identity-http")]
impl ReqwestIdentityClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[cfg(feature = "identity-http")]
impl IdentityProviderClient for ReqwestIdentityClient {
    fn authenticate(
        &self,
        token: &str,
        timeout: Duration,
    ) -> Result<IdentityRecord, ProviderError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Rejected);
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!("status {status}")));
        }

        resp.json::<IdentityRecord>()
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}
