pub mod config;
pub mod crypto;
pub mod derive;
pub mod errors;
pub mod identity;
pub mod links;
pub mod log;
pub mod message;
pub mod nonce;
pub mod ownership;
pub mod persistence;
pub mod service;
pub mod session;
pub mod store;
pub mod txn;
pub mod types;
pub mod verify;
pub mod web_api;

pub use config::{Config, LogFormat};
pub use derive::{DerivedAccount, DerivedKeypair, KeyDeriver};
pub use errors::{AuthError, ErrorCategory, ErrorCode, VerifyError};
pub use identity::{
    IdentityProviderClient, IdentityTokenValidator, MockIdentityClient, ProviderError,
    ValidateOptions,
};
pub use links::LinkRegistry;
pub use nonce::NonceRegistry;
pub use ownership::{ChallengeToken, OwnershipProofService, ProofReceipt};
pub use service::{AuthService, LoginOutcome, ServiceSettings, SignatureLogin};
pub use session::SessionManager;
pub use store::{Clock, InMemoryStore, KvStore, ManualClock, SystemClock};
pub use types::*;
pub use verify::{verify_signature, VerifyResult};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chrono::{Duration, Utc};
    use ed25519_dalek::{Signer, SigningKey};

    use crate::crypto::encode_account_address;
    use crate::message::canonical_bytes;
    use crate::txn::PaymentTransaction;
    use crate::*;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[5u8; 32])
    }

    fn meta() -> SessionMeta {
        SessionMeta {
            ip: None,
            user_agent: Some("unit".into()),
        }
    }

    fn service() -> (AuthService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let s = AuthService::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            ServiceSettings::default(),
        )
        .with_challenge_secret(&[1u8; 32]);
        (s, clock)
    }

    fn signed_login(s: &AuthService, sk: &SigningKey) -> SignatureLogin {
        let address = encode_account_address(&sk.verifying_key().to_bytes());
        let nonce = s.request_nonce(Chain::Voi, &address).unwrap();
        let payload = s.message_template(&nonce);
        let sig = sk.sign(&canonical_bytes(&payload));
        SignatureLogin {
            chain: Chain::Voi,
            address,
            signature: STANDARD.encode(sig.to_bytes()),
            nonce: nonce.token,
            payload,
        }
    }

    #[test]
    fn replayed_login_fails_after_first_use() {
        let (s, _) = service();
        let login = signed_login(&s, &signing_key());

        let first = s.login_with_signature(&login, &meta()).unwrap();
        assert!(first.new_profile);

        // signature is still valid, the nonce is not
        assert!(verify_signature(
            login.chain.scheme(),
            &login.address,
            &login.signature,
            &login.payload
        )
        .is_ok());
        let err = s.login_with_signature(&login, &meta()).unwrap_err();
        assert!(matches!(err, AuthError::NonceNotFound));
    }

    #[test]
    fn second_login_reuses_profile() {
        let (s, _) = service();
        let sk = signing_key();
        let a = s.login_with_signature(&signed_login(&s, &sk), &meta()).unwrap();
        let b = s.login_with_signature(&signed_login(&s, &sk), &meta()).unwrap();
        assert_eq!(a.profile_id, b.profile_id);
        assert!(!b.new_profile);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn expired_payload_rejected_without_burning_nonce() {
        let (s, clock) = service();
        let mut login = signed_login(&s, &signing_key());
        login.payload.expires_at = clock.now() - Duration::seconds(1);
        let sig = signing_key().sign(&canonical_bytes(&login.payload));
        login.signature = STANDARD.encode(sig.to_bytes());

        assert!(matches!(
            s.login_with_signature(&login, &meta()).unwrap_err(),
            AuthError::PayloadExpired
        ));

        login.payload.expires_at = clock.now() + Duration::seconds(60);
        let sig = signing_key().sign(&canonical_bytes(&login.payload));
        login.signature = STANDARD.encode(sig.to_bytes());
        s.login_with_signature(&login, &meta()).unwrap();
    }

    #[test]
    fn link_flow_end_to_end() {
        let (s, _) = service();
        let owner = s
            .login_with_signature(&signed_login(&s, &signing_key()), &meta())
            .unwrap();

        let derived = KeyDeriver::default().derive(&[77u8; 32]).unwrap();
        let challenge = s.begin_link(&owner.profile_id).unwrap();
        let sk = derived.signing_key();
        let stx = PaymentTransaction::self_payment(
            sk.verifying_key().to_bytes(),
            challenge.as_str().as_bytes().to_vec(),
            1,
            "voimain-v1.0",
        )
        .sign(&sk)
        .unwrap();

        let link = s
            .complete_link(
                &owner.profile_id,
                Chain::Voi,
                &derived.address,
                challenge.as_str(),
                &stx.encode().unwrap(),
                None,
            )
            .unwrap();
        assert!(!link.is_primary);

        let view = s.current_session(&owner.token).unwrap().unwrap();
        assert_eq!(view.links.len(), 2);
    }
}
