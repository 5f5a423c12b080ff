use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::derive::DEFAULT_DERIVATION_DOMAIN;
use crate::types::{
    CHALLENGE_TTL_SECS, IDENTITY_RETRIES, IDENTITY_TIMEOUT_MS, NONCE_TTL_SECS, PURGE_INTERVAL_SECS,
    SESSION_TTL_SECS,
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_COOKIE_NAME: &str = "crossauth_session";
const ENV_PREFIX: &str = "CROSSAUTH_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
    /// JSON when stdout is not a terminal, text otherwise.
    #[default]
    Auto,
}

impl LogFormat {
    pub fn resolve(self) -> LogFormat {
        match self {
            LogFormat::Auto if std::io::stdout().is_terminal() => LogFormat::Text,
            LogFormat::Auto => LogFormat::Json,
            other => other,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            "auto" => Ok(LogFormat::Auto),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub name: String,
    /// Only turn off for plain-http local development.
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            secure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Provider endpoint. Identity-token login is disabled when unset.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: IDENTITY_TIMEOUT_MS,
            retries: IDENTITY_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub nonce_ttl_secs: i64,
    pub challenge_ttl_secs: i64,
    pub session_ttl_secs: i64,
    /// How often the server sweeps expired nonces and sessions.
    pub purge_interval_secs: i64,
    /// Hex. A random per-process secret is used when unset, which means
    /// outstanding link challenges die with the process.
    pub challenge_secret: Option<String>,
    pub derivation_domain: String,
    pub statement: Option<String>,
    pub domain: Option<String>,
    pub cookie: CookieConfig,
    pub identity: IdentityConfig,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            nonce_ttl_secs: NONCE_TTL_SECS,
            challenge_ttl_secs: CHALLENGE_TTL_SECS,
            session_ttl_secs: SESSION_TTL_SECS,
            purge_interval_secs: PURGE_INTERVAL_SECS,
            challenge_secret: None,
            derivation_domain: DEFAULT_DERIVATION_DOMAIN.to_string(),
            statement: None,
            domain: None,
            cookie: CookieConfig::default(),
            identity: IdentityConfig::default(),
            log_format: LogFormat::Auto,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with `CROSSAUTH_*` process variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|k| std::env::var(k).ok())
    }

    /// Overlays variables looked up through `lookup`, e.g.
    /// `CROSSAUTH_SESSION_TTL_SECS` or `CROSSAUTH_IDENTITY_ENDPOINT`.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("NONCE_TTL_SECS") {
            self.nonce_ttl_secs = parse_num("NONCE_TTL_SECS", &v)?;
        }
        if let Some(v) = var("CHALLENGE_TTL_SECS") {
            self.challenge_ttl_secs = parse_num("CHALLENGE_TTL_SECS", &v)?;
        }
        if let Some(v) = var("SESSION_TTL_SECS") {
            self.session_ttl_secs = parse_num("SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = var("PURGE_INTERVAL_SECS") {
            self.purge_interval_secs = parse_num("PURGE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("CHALLENGE_SECRET") {
            self.challenge_secret = Some(v);
        }
        if let Some(v) = var("DERIVATION_DOMAIN") {
            self.derivation_domain = v;
        }
        if let Some(v) = var("STATEMENT") {
            self.statement = Some(v);
        }
        if let Some(v) = var("DOMAIN") {
            self.domain = Some(v);
        }
        if let Some(v) = var("COOKIE_NAME") {
            self.cookie.name = v;
        }
        if let Some(v) = var("COOKIE_SECURE") {
            self.cookie.secure = parse_num("COOKIE_SECURE", &v)?;
        }
        if let Some(v) = var("IDENTITY_ENDPOINT") {
            self.identity.endpoint = Some(v);
        }
        if let Some(v) = var("IDENTITY_TIMEOUT_MS") {
            self.identity.timeout_ms = parse_num("IDENTITY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("IDENTITY_RETRIES") {
            self.identity.retries = parse_num("IDENTITY_RETRIES", &v)?;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.log_format = v.parse().map_err(|reason| ConfigError::Invalid {
                key: "LOG_FORMAT".into(),
                reason,
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        for (key, v) in [
            ("nonce_ttl_secs", self.nonce_ttl_secs),
            ("challenge_ttl_secs", self.challenge_ttl_secs),
            ("session_ttl_secs", self.session_ttl_secs),
            ("purge_interval_secs", self.purge_interval_secs),
        ] {
            if v <= 0 {
                return Err(invalid(key, "must be positive"));
            }
        }
        if self.derivation_domain.is_empty() {
            return Err(invalid("derivation_domain", "must not be empty"));
        }
        if self.cookie.name.is_empty() {
            return Err(invalid("cookie.name", "must not be empty"));
        }
        self.challenge_secret_bytes()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid("bind_addr", &e.to_string()))
    }

    pub fn challenge_secret_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(hex_secret) = self.challenge_secret.as_deref() else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_secret.trim())
            .map_err(|e| invalid("challenge_secret", &e.to_string()))?;
        if bytes.len() < 16 {
            return Err(invalid("challenge_secret", "must be at least 16 bytes"));
        }
        Ok(Some(bytes))
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, v: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    v.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, &e.to_string()))
}
