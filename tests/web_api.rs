use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use crossauth::config::CookieConfig;
use crossauth::crypto::{encode_account_address, evm_address_from_key, evm_personal_sign_hash};
use crossauth::txn::PaymentTransaction;
use crossauth::web_api::{self, AppState};
use crossauth::{
    AuthService, IdentityRecord, IdentityTokenValidator, InMemoryStore, KeyDeriver, ManualClock,
    MockIdentityClient, ServiceSettings,
};
use ed25519_dalek::{Signer, SigningKey};
use k256::ecdsa::SigningKey as SecpSigningKey;
use serde_json::{json, Value};
use tower::util::ServiceExt;

const COOKIE: &str = "crossauth_session";

fn app_with(client: Option<Arc<MockIdentityClient>>) -> Router {
    let service = AuthService::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(ManualClock::new(Utc::now())),
        ServiceSettings {
            domain: Some("app.example".into()),
            ..ServiceSettings::default()
        },
    )
    .with_challenge_secret(&[4u8; 32]);
    let service = match client {
        Some(c) => service.with_identity_validator(Arc::new(IdentityTokenValidator::new(c))),
        None => service,
    };
    web_api::build_router(AppState::new(service, CookieConfig::default()))
}

fn app() -> Router {
    app_with(None)
}

async fn call(app: &Router, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Response<Body> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = cookie {
        req = req.header("cookie", format!("{COOKIE}={token}"));
    }
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(req.body(body).unwrap()).await.unwrap()
}

async fn json_body(resp: Response<Body>) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookie(resp: &Response<Body>) -> String {
    resp.headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn cookie_value(set_cookie: &str) -> String {
    let pair = set_cookie.split(';').next().unwrap();
    pair.split_once('=').unwrap().1.to_string()
}

async fn wallet_login(app: &Router, sk: &SigningKey) -> (Value, String) {
    let address = encode_account_address(&sk.verifying_key().to_bytes());
    let nonce = json_body(
        call(app, "POST", "/v1/auth/nonce", None, Some(json!({"chain": "voi", "address": address}))).await,
    )
    .await;

    let message = nonce["message"].as_str().unwrap();
    let sig = STANDARD.encode(sk.sign(message.as_bytes()).to_bytes());
    let resp = call(
        app,
        "POST",
        "/v1/auth/verify",
        None,
        Some(json!({
            "chain": "voi",
            "address": address,
            "signature": sig,
            "nonce": nonce["nonce"],
            "payload": nonce["payload"],
        })),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let cookie = cookie_value(&set_cookie(&resp));
    (json_body(resp).await, cookie)
}

#[tokio::test]
async fn security_headers_are_applied() {
    let resp = call(&app(), "GET", "/health", None, None).await;
    assert_eq!(resp.status(), 200);
    let headers = resp.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("cache-control").unwrap(), "no-store");
    let body = json_body(resp).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["identityLogin"], false);
}

#[tokio::test]
async fn nonce_response_carries_canonical_message() {
    let app = app();
    let body = json_body(
        call(&app, "POST", "/v1/auth/nonce", None, Some(json!({"chain": "ethereum", "address": "0xabc"}))).await,
    )
    .await;

    let nonce = body["nonce"].as_str().unwrap();
    let message = body["message"].as_str().unwrap();
    assert_eq!(nonce.len(), 64);
    assert!(message.starts_with("Sign in with your wallet\n"));
    assert!(message.contains(&format!("\nNonce: {nonce}\n")));
    assert!(message.ends_with("\nDomain: app.example"));
    assert_eq!(body["payload"]["domain"], "app.example");
}

#[tokio::test]
async fn unknown_chain_is_400() {
    let resp = call(&app(), "POST", "/v1/auth/nonce", None, Some(json!({"chain": "dogecoin", "address": "x"}))).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json_body(resp).await["error"], "invalid request");
}

#[tokio::test]
async fn wallet_login_sets_hardened_cookie() {
    let app = app();
    let sk = SigningKey::from_bytes(&[5u8; 32]);
    let address = encode_account_address(&sk.verifying_key().to_bytes());
    let nonce = json_body(
        call(&app, "POST", "/v1/auth/nonce", None, Some(json!({"chain": "voi", "address": address}))).await,
    )
    .await;
    let sig = STANDARD.encode(sk.sign(nonce["message"].as_str().unwrap().as_bytes()).to_bytes());

    let resp = call(
        &app,
        "POST",
        "/v1/auth/verify",
        None,
        Some(json!({
            "chain": "voi", "address": address, "signature": sig,
            "nonce": nonce["nonce"], "payload": nonce["payload"],
        })),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let cookie = set_cookie(&resp);
    assert!(cookie.starts_with(&format!("{COOKIE}=")));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=86400"));

    let body = json_body(resp).await;
    assert_eq!(body["newProfile"], true);
    assert_eq!(body["address"], address.as_str());
}

#[tokio::test]
async fn evm_wallet_login_roundtrip() {
    let app = app();
    let sk = SecpSigningKey::from_slice(&[11u8; 32]).unwrap();
    let address = format!("0x{}", hex::encode(evm_address_from_key(sk.verifying_key())));

    let nonce = json_body(
        call(&app, "POST", "/v1/auth/nonce", None, Some(json!({"chain": "base", "address": address}))).await,
    )
    .await;
    let digest = evm_personal_sign_hash(nonce["message"].as_str().unwrap().as_bytes());
    let (sig, recid) = sk.sign_prehash_recoverable(&digest).unwrap();
    let mut sig_bytes = sig.to_vec();
    sig_bytes.push(recid.to_byte() + 27);

    let resp = call(
        &app,
        "POST",
        "/v1/auth/verify",
        None,
        Some(json!({
            "chain": "base", "address": address,
            "signature": format!("0x{}", hex::encode(sig_bytes)),
            "nonce": nonce["nonce"], "payload": nonce["payload"],
        })),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body = json_body(resp).await;
    assert_eq!(
        body["address"].as_str().unwrap().to_lowercase(),
        address.to_lowercase()
    );
}

#[tokio::test]
async fn bad_signature_gets_generic_401() {
    let app = app();
    let sk = SigningKey::from_bytes(&[5u8; 32]);
    let address = encode_account_address(&sk.verifying_key().to_bytes());
    let nonce = json_body(
        call(&app, "POST", "/v1/auth/nonce", None, Some(json!({"chain": "voi", "address": address}))).await,
    )
    .await;
    let sig = STANDARD.encode(sk.sign(b"something else").to_bytes());

    let resp = call(
        &app,
        "POST",
        "/v1/auth/verify",
        None,
        Some(json!({
            "chain": "voi", "address": address, "signature": sig,
            "nonce": nonce["nonce"], "payload": nonce["payload"],
        })),
    )
    .await;
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().get("set-cookie").is_none());
    assert_eq!(json_body(resp).await, json!({"error": "authentication failed"}));
}

#[tokio::test]
async fn session_refresh_and_logout() {
    let app = app();
    let (login, token) = wallet_login(&app, &SigningKey::from_bytes(&[5u8; 32])).await;

    let resp = call(&app, "GET", "/v1/auth/session", Some(&token), None).await;
    assert_eq!(resp.status(), 200);
    let session = json_body(resp).await;
    assert_eq!(session["profileId"], login["profileId"]);
    assert_eq!(session["links"].as_array().unwrap().len(), 1);
    assert_eq!(session["links"][0]["isPrimary"], true);

    let resp = call(&app, "POST", "/v1/auth/refresh", Some(&token), None).await;
    assert_eq!(resp.status(), 200);
    assert!(set_cookie(&resp).contains("Max-Age="));

    let resp = call(&app, "POST", "/v1/auth/logout", Some(&token), None).await;
    assert_eq!(resp.status(), 200);
    assert!(set_cookie(&resp).starts_with(&format!("{COOKIE}=")));

    let resp = call(&app, "GET", "/v1/auth/session", Some(&token), None).await;
    assert_eq!(resp.status(), 401);
    let resp = call(&app, "POST", "/v1/auth/refresh", Some(&token), None).await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn logout_without_cookie_is_ok() {
    let resp = call(&app(), "POST", "/v1/auth/logout", None, None).await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn identity_token_login() {
    let client = Arc::new(MockIdentityClient::new().with_token(
        "provider-token",
        IdentityRecord {
            external_user_id: "ext-1".into(),
            wallet_address: None,
            email: Some("a@example.com".into()),
            phone_number: None,
            auth_method: "email".into(),
        },
    ));
    let app = app_with(Some(client));

    let resp = call(&app, "POST", "/v1/auth/token", None, Some(json!({"token": "provider-token"}))).await;
    assert_eq!(resp.status(), 200);
    let first = json_body(resp).await;
    assert_eq!(first["newProfile"], true);

    let resp = call(&app, "POST", "/v1/auth/token", None, Some(json!({"token": "provider-token"}))).await;
    let second = json_body(resp).await;
    assert_eq!(second["profileId"], first["profileId"]);
    assert_eq!(second["newProfile"], false);

    let resp = call(&app, "POST", "/v1/auth/token", None, Some(json!({"token": "forged"}))).await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn link_derived_account_via_proof() {
    let app = app();
    let primary = SigningKey::from_bytes(&[5u8; 32]);
    let primary_address = encode_account_address(&primary.verifying_key().to_bytes());
    let (_, token) = wallet_login(&app, &primary).await;

    let resp = call(&app, "POST", "/v1/link/challenge", Some(&token), None).await;
    assert_eq!(resp.status(), 200);
    let challenge = json_body(resp).await;
    let domain = challenge["derivationDomain"].as_str().unwrap();
    let challenge_token = challenge["challenge"].as_str().unwrap();

    let derived = KeyDeriver::new(domain).derive(&[99u8; 32]).unwrap();
    let sk = derived.signing_key();
    let stx = PaymentTransaction::self_payment(
        sk.verifying_key().to_bytes(),
        challenge_token.as_bytes().to_vec(),
        5,
        "voimain-v1.0",
    )
    .sign(&sk)
    .unwrap();

    let body = json!({
        "chain": "voi",
        "address": derived.address,
        "challenge": challenge_token,
        "signedTx": hex::encode(stx.encode().unwrap()),
        "derivedFrom": {"chain": "voi", "address": primary_address},
    });
    let resp = call(&app, "POST", "/v1/link/verify", Some(&token), Some(body.clone())).await;
    assert_eq!(resp.status(), 200);
    let link = json_body(resp).await;
    assert_eq!(link["isPrimary"], false);
    assert_eq!(link["derivedFromChain"], "voi");

    // a second profile cannot claim the same address
    let (_, other) = wallet_login(&app, &SigningKey::from_bytes(&[6u8; 32])).await;
    let resp = call(&app, "POST", "/v1/link/challenge", Some(&other), None).await;
    let other_challenge = json_body(resp).await["challenge"].as_str().unwrap().to_string();
    let stx = PaymentTransaction::self_payment(
        sk.verifying_key().to_bytes(),
        other_challenge.as_bytes().to_vec(),
        5,
        "voimain-v1.0",
    )
    .sign(&sk)
    .unwrap();
    let resp = call(
        &app,
        "POST",
        "/v1/link/verify",
        Some(&other),
        Some(json!({
            "chain": "voi",
            "address": derived.address,
            "challenge": other_challenge,
            "signedTx": hex::encode(stx.encode().unwrap()),
        })),
    )
    .await;
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn link_routes_require_session() {
    let app = app();
    let resp = call(&app, "POST", "/v1/link/challenge", None, None).await;
    assert_eq!(resp.status(), 401);
    let resp = call(&app, "POST", "/v1/link/challenge", Some("made-up"), None).await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn derived_from_must_be_owned_by_linking_profile() {
    let app = app();
    let victim = SigningKey::from_bytes(&[5u8; 32]);
    let victim_address = encode_account_address(&victim.verifying_key().to_bytes());
    wallet_login(&app, &victim).await;
    let (_, token) = wallet_login(&app, &SigningKey::from_bytes(&[6u8; 32])).await;

    let fresh = SigningKey::from_bytes(&[8u8; 32]);
    let fresh_address = encode_account_address(&fresh.verifying_key().to_bytes());

    for source in [victim_address.as_str(), "UNLINKEDADDRESS"] {
        let resp = call(&app, "POST", "/v1/link/challenge", Some(&token), None).await;
        let challenge = json_body(resp).await["challenge"].as_str().unwrap().to_string();
        let stx = PaymentTransaction::self_payment(
            fresh.verifying_key().to_bytes(),
            challenge.as_bytes().to_vec(),
            5,
            "voimain-v1.0",
        )
        .sign(&fresh)
        .unwrap();

        let resp = call(
            &app,
            "POST",
            "/v1/link/verify",
            Some(&token),
            Some(json!({
                "chain": "voi",
                "address": fresh_address,
                "challenge": challenge,
                "signedTx": hex::encode(stx.encode().unwrap()),
                "derivedFrom": {"chain": "voi", "address": source},
            })),
        )
        .await;
        assert_eq!(resp.status(), 401);
    }

    let session = json_body(call(&app, "GET", "/v1/auth/session", Some(&token), None).await).await;
    assert_eq!(session["links"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn purge_task_reclaims_abandoned_nonces() {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = Arc::new(AuthService::new(store.clone(), clock.clone(), ServiceSettings::default()));
    for i in 0..20 {
        service.request_nonce(crossauth::Chain::Voi, &format!("ADDR{i}")).unwrap();
    }
    clock.advance(chrono::Duration::days(30));

    let task = web_api::spawn_purge_task(service, std::time::Duration::from_millis(10));
    for _ in 0..100 {
        if store.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    task.abort();
    assert!(store.is_empty());
}
