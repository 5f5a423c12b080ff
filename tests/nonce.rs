use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use crossauth::{AuthError, Chain, Clock, InMemoryStore, ManualClock, NonceRegistry, NONCE_TTL_SECS};

fn registry() -> (Arc<NonceRegistry>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let r = NonceRegistry::new(Arc::new(InMemoryStore::new()), clock.clone());
    (Arc::new(r), clock)
}

#[test]
fn issued_nonce_is_32_bytes_hex_with_default_ttl() {
    let (r, clock) = registry();
    let n = r.issue(Chain::Algorand, "ADDR").unwrap();
    assert_eq!(n.token.len(), 64);
    assert!(hex::decode(&n.token).is_ok());
    assert_eq!(n.expires_at, clock.now() + Duration::seconds(NONCE_TTL_SECS));
}

#[test]
fn consume_succeeds_once() {
    let (r, _) = registry();
    let n = r.issue(Chain::Voi, "ADDR").unwrap();

    r.consume_and_validate(Chain::Voi, "ADDR", &n.token).unwrap();
    let err = r
        .consume_and_validate(Chain::Voi, "ADDR", &n.token)
        .unwrap_err();
    assert!(matches!(err, AuthError::NonceNotFound));
}

#[test]
fn expired_nonce_is_rejected_and_gone() {
    let (r, clock) = registry();
    let n = r.issue(Chain::Voi, "ADDR").unwrap();
    clock.advance(Duration::seconds(NONCE_TTL_SECS + 1));

    let err = r
        .consume_and_validate(Chain::Voi, "ADDR", &n.token)
        .unwrap_err();
    assert!(matches!(err, AuthError::NonceExpired));

    let err = r
        .consume_and_validate(Chain::Voi, "ADDR", &n.token)
        .unwrap_err();
    assert!(matches!(err, AuthError::NonceNotFound));
}

#[test]
fn nonces_are_scoped_per_chain() {
    let (r, _) = registry();
    let n = r.issue(Chain::Voi, "ADDR").unwrap();
    let err = r
        .consume_and_validate(Chain::Algorand, "ADDR", &n.token)
        .unwrap_err();
    assert!(matches!(err, AuthError::NonceNotFound));
    r.consume_and_validate(Chain::Voi, "ADDR", &n.token).unwrap();
}

#[test]
fn empty_address_is_bad_request() {
    let (r, _) = registry();
    assert!(matches!(
        r.issue(Chain::Base, "  ").unwrap_err(),
        AuthError::BadRequest(_)
    ));
}

#[test]
fn racing_consumers_exactly_one_wins() {
    for _ in 0..20 {
        let (r, _) = registry();
        let n = r.issue(Chain::Solana, "So1").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = r.clone();
                let token = n.token.clone();
                thread::spawn(move || r.consume_and_validate(Chain::Solana, "So1", &token).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }
}
