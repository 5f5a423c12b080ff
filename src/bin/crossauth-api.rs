use std::sync::Arc;

use crossauth::config::Config;
use crossauth::identity::IdentityTokenValidator;
use crossauth::log::initialize_logging;
use crossauth::web_api::{self, AppState};
use crossauth::{AuthService, InMemoryStore, SystemClock};
use tracing::{error, info};

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    let cfg = match std::env::var("CROSSAUTH_CONFIG") {
        Ok(path) => Config::from_file(path)?.with_env(|k| std::env::var(k).ok())?,
        Err(_) => Config::from_env()?,
    };
    Ok(cfg)
}

#[cfg(feature = "identity-http")]
fn identity_validator(cfg: &Config) -> Option<Arc<IdentityTokenValidator>> {
    use crossauth::ValidateOptions;

    let endpoint = cfg.identity.endpoint.clone()?;
    let opts = ValidateOptions {
        timeout: std::time::Duration::from_millis(cfg.identity.timeout_ms),
        retries: cfg.identity.retries,
    };
    let client = Arc::new(crossauth::identity::ReqwestIdentityClient::new(endpoint));
    Some(Arc::new(IdentityTokenValidator::with_options(client, opts)))
}

#[cfg(not(feature = "identity-http"))]
fn identity_validator(cfg: &Config) -> Option<Arc<IdentityTokenValidator>> {
    if cfg.identity.endpoint.is_some() {
        tracing::warn!(target: "identity", "identity endpoint configured but built without the identity-http feature");
    }
    None
}

#[tokio::main]
async fn main() {
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        }
    };
    initialize_logging(cfg.log_format);

    let addr = match cfg.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid bind address");
            std::process::exit(2);
        }
    };

    let service = match AuthService::from_config(
        &cfg,
        Arc::new(InMemoryStore::new()),
        Arc::new(SystemClock),
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to build auth service");
            std::process::exit(2);
        }
    };
    let service = match identity_validator(&cfg) {
        Some(v) => service.with_identity_validator(v),
        None => service,
    };

    info!(%addr, identity_login = service.identity_enabled(), "starting crossauth api");
    let state = AppState::new(service, cfg.cookie.clone());
    let purge_every = std::time::Duration::from_secs(cfg.purge_interval_secs.unsigned_abs());
    web_api::spawn_purge_task(state.service.clone(), purge_every);
    if let Err(e) = web_api::run_http_server(addr, state).await {
        error!(error = %e, "api server stopped");
        std::process::exit(1);
    }
}
