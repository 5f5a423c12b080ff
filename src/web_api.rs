use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CookieConfig;
use crate::errors::{AuthError, ErrorCategory};
use crate::message::canonical_message;
use crate::service::{AuthService, SignatureLogin};
use crate::types::{AccountLink, AuthPayload, Chain, DerivedFrom, Session, SessionMeta, Timestamp};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthService>,
    pub cookie: CookieConfig,
}

impl AppState {
    pub fn new(service: AuthService, cookie: CookieConfig) -> Self {
        Self {
            service: Arc::new(service),
            cookie,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    identity_login: bool,
}

#[derive(Deserialize)]
struct NonceRequest {
    chain: String,
    address: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NonceResponse {
    chain: Chain,
    address: String,
    nonce: String,
    expires_at: Timestamp,
    /// Suggested payload; `message` is its canonical rendering.
    payload: AuthPayload,
    message: String,
}

#[derive(Deserialize)]
struct VerifyRequest {
    chain: String,
    address: String,
    signature: String,
    nonce: String,
    payload: AuthPayload,
}

#[derive(Deserialize)]
struct TokenLoginRequest {
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    ok: bool,
    profile_id: String,
    session_id: String,
    expires_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    new_profile: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    ok: bool,
    expires_at: Timestamp,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkView {
    chain: Chain,
    address: String,
    is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    derived_from_chain: Option<Chain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    derived_from_address: Option<String>,
    linked_at: Timestamp,
}

impl From<AccountLink> for LinkView {
    fn from(l: AccountLink) -> Self {
        Self {
            chain: l.chain,
            address: l.address,
            is_primary: l.is_primary,
            derived_from_chain: l.derived_from_chain,
            derived_from_address: l.derived_from_address,
            linked_at: l.linked_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    profile_id: String,
    session_id: String,
    created_at: Timestamp,
    expires_at: Timestamp,
    links: Vec<LinkView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkChallengeResponse {
    challenge: String,
    primary_address: String,
    expires_at: Timestamp,
    derivation_domain: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DerivedFromRequest {
    chain: String,
    address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkVerifyRequest {
    chain: String,
    address: String,
    challenge: String,
    /// Hex-encoded msgpack of the signed transaction.
    signed_tx: String,
    #[serde(default)]
    derived_from: Option<DerivedFromRequest>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Renders an `AuthError` without leaking which check failed.
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError(e)
    }
}

pub fn error_to_http(err: &AuthError) -> (StatusCode, &'static str) {
    let status = match err.category() {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Conflict if matches!(err, AuthError::AddressAlreadyLinked) => {
            StatusCode::CONFLICT
        }
        ErrorCategory::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    };
    (status, err.public_message())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = error_to_http(&self.0);
        if self.0.is_fatal() {
            error!(target: "web_api", code = self.0.code(), error = %self.0, "request failed");
        } else {
            debug!(target: "web_api", code = self.0.code(), error = %self.0, "request rejected");
        }
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Service calls may block on the store or the identity provider.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(AuthError::Internal(format!("worker join: {e}"))))?
        .map_err(ApiError)
}

fn parse_chain(s: &str) -> Result<Chain, AuthError> {
    s.parse().map_err(|_| AuthError::BadRequest("unknown chain"))
}

fn session_meta(headers: &HeaderMap) -> SessionMeta {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    SessionMeta {
        ip: header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty()),
        user_agent: header_str(header::USER_AGENT.as_str()),
    }
}

fn session_cookie(
    cfg: &CookieConfig,
    token: String,
    expires_at: Timestamp,
    now: Timestamp,
) -> Cookie<'static> {
    let max_age = (expires_at - now).num_seconds().max(0);
    Cookie::build((cfg.name.clone(), token))
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .build()
}

fn session_token(state: &AppState, jar: &CookieJar) -> Result<String, AuthError> {
    jar.get(&state.cookie.name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::SessionNotFound)
}

async fn current_session(state: &AppState, jar: &CookieJar) -> ApiResult<Session> {
    let token = session_token(state, jar)?;
    let service = state.service.clone();
    blocking(move || service.sessions().resolve(&token)?.ok_or(AuthError::SessionNotFound)).await
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: "crossauth",
        identity_login: state.service.identity_enabled(),
    })
}

async fn auth_nonce(
    State(state): State<AppState>,
    Json(req): Json<NonceRequest>,
) -> ApiResult<Json<NonceResponse>> {
    let chain = parse_chain(&req.chain)?;
    let service = state.service.clone();
    let address = req.address.clone();
    let nonce = blocking(move || service.request_nonce(chain, &address)).await?;

    let payload = state.service.message_template(&nonce);
    Ok(Json(NonceResponse {
        chain,
        address: nonce.address.clone(),
        nonce: nonce.token.clone(),
        expires_at: nonce.expires_at,
        message: canonical_message(&payload),
        payload,
    }))
}

async fn auth_verify(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<(CookieJar, Json<LoginResponse>)> {
    let login = SignatureLogin {
        chain: parse_chain(&req.chain)?,
        address: req.address,
        signature: req.signature,
        nonce: req.nonce,
        payload: req.payload,
    };
    let meta = session_meta(&headers);
    let service = state.service.clone();
    let outcome = blocking(move || service.login_with_signature(&login, &meta)).await?;

    info!(target: "web_api", profile_id = %outcome.profile_id, "wallet login");
    let cookie = session_cookie(
        &state.cookie,
        outcome.token,
        outcome.session.expires_at,
        state.service.now(),
    );
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            ok: true,
            profile_id: outcome.profile_id,
            session_id: outcome.session.id,
            expires_at: outcome.session.expires_at,
            address: outcome.address,
            new_profile: outcome.new_profile,
        }),
    ))
}

async fn auth_token(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(req): Json<TokenLoginRequest>,
) -> ApiResult<(CookieJar, Json<LoginResponse>)> {
    let meta = session_meta(&headers);
    let service = state.service.clone();
    let outcome = blocking(move || service.login_with_identity_token(&req.token, &meta)).await?;

    info!(target: "web_api", profile_id = %outcome.profile_id, "identity token login");
    let cookie = session_cookie(
        &state.cookie,
        outcome.token,
        outcome.session.expires_at,
        state.service.now(),
    );
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            ok: true,
            profile_id: outcome.profile_id,
            session_id: outcome.session.id,
            expires_at: outcome.session.expires_at,
            address: None,
            new_profile: outcome.new_profile,
        }),
    ))
}

async fn auth_refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<RefreshResponse>)> {
    let token = session_token(&state, &jar)?;
    let service = state.service.clone();
    let refresh_token = token.clone();
    let expires_at = blocking(move || service.refresh(&refresh_token)).await?;

    let cookie = session_cookie(&state.cookie, token, expires_at, state.service.now());
    Ok((
        jar.add(cookie),
        Json(RefreshResponse {
            ok: true,
            expires_at,
        }),
    ))
}

async fn auth_logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Ok(token) = session_token(&state, &jar) {
        let service = state.service.clone();
        if let Err(ApiError(e)) = blocking(move || service.logout(&token)).await {
            warn!(target: "web_api", error = %e, "logout could not revoke session");
        }
    }
    let removal = Cookie::build((state.cookie.name.clone(), "")).path("/");
    (jar.remove(removal), Json(OkResponse { ok: true }))
}

async fn auth_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<SessionResponse>> {
    let token = session_token(&state, &jar)?;
    let service = state.service.clone();
    let view = blocking(move || {
        service
            .current_session(&token)?
            .ok_or(AuthError::SessionNotFound)
    })
    .await?;

    Ok(Json(SessionResponse {
        profile_id: view.session.profile_id,
        session_id: view.session.id,
        created_at: view.session.created_at,
        expires_at: view.session.expires_at,
        links: view.links.into_iter().map(LinkView::from).collect(),
    }))
}

async fn link_challenge(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<LinkChallengeResponse>> {
    let session = current_session(&state, &jar).await?;
    let service = state.service.clone();
    let challenge = blocking(move || service.begin_link(&session.profile_id)).await?;

    Ok(Json(LinkChallengeResponse {
        challenge: challenge.as_str().to_string(),
        primary_address: challenge.primary_address,
        expires_at: challenge.expires_at,
        derivation_domain: state.service.derivation_domain().to_string(),
    }))
}

async fn link_verify(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LinkVerifyRequest>,
) -> ApiResult<Json<LinkView>> {
    let session = current_session(&state, &jar).await?;
    let chain = parse_chain(&req.chain)?;
    let signed_tx = hex::decode(req.signed_tx.trim().trim_start_matches("0x"))
        .map_err(|_| AuthError::BadRequest("signedTx must be hex"))?;
    let derived_from = req
        .derived_from
        .map(|d| {
            Ok::<_, AuthError>(DerivedFrom {
                chain: parse_chain(&d.chain)?,
                address: d.address,
            })
        })
        .transpose()?;

    let service = state.service.clone();
    let link = blocking(move || {
        service.complete_link(
            &session.profile_id,
            chain,
            &req.address,
            &req.challenge,
            &signed_tx,
            derived_from,
        )
    })
    .await?;

    Ok(Json(LinkView::from(link)))
}

async fn security_headers(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/auth/nonce", post(auth_nonce))
        .route("/v1/auth/verify", post(auth_verify))
        .route("/v1/auth/token", post(auth_token))
        .route("/v1/auth/refresh", post(auth_refresh))
        .route("/v1/auth/logout", post(auth_logout))
        .route("/v1/auth/session", get(auth_session))
        .route("/v1/link/challenge", post(link_challenge))
        .route("/v1/link/verify", post(link_verify))
        .layer(middleware::map_response(security_headers))
        .with_state(state)
}

/// Periodically sweeps expired nonces and sessions on the blocking pool.
pub fn spawn_purge_task(
    service: Arc<AuthService>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let svc = service.clone();
            match tokio::task::spawn_blocking(move || svc.purge_expired()).await {
                Ok(Ok((nonces, sessions))) => {
                    debug!(target: "web_api", nonces, sessions, "purge sweep finished");
                }
                Ok(Err(e)) => warn!(target: "web_api", error = %e, "purge sweep failed"),
                Err(e) => error!(target: "web_api", error = %e, "purge task panicked"),
            }
        }
    })
}

pub async fn run_http_server(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "web_api", %addr, "listening");
    axum::serve(listener, build_router(state)).await
}
