use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::decode_account_address;
use crate::errors::AuthError;
use crate::store::Clock;
use crate::txn::{SignedTransaction, PAYMENT_TYPE};
use crate::types::{ProfileId, Timestamp, CHALLENGE_TTL_SECS};
use crate::verify::verify_with_pubkey;

type HmacSha256 = Hmac<Sha256>;

const TAG_DOMAIN: &[u8] = b"crossauth/challenge/v1";
const TOKEN_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ChallengeClaims {
    profile_id: ProfileId,
    primary_address: String,
    issued_at: Timestamp,
    expires_at: Timestamp,
}

/// Self-contained, HMAC-tagged link challenge. Nothing is stored server
/// side; validity comes from the tag and the embedded timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeToken {
    pub profile_id: ProfileId,
    pub primary_address: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub integrity_tag: Vec<u8>,
    encoded: String,
}

impl ChallengeToken {
    /// Wire form. These exact bytes go into the proof transaction's note.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofReceipt {
    pub tx_id: String,
    pub profile_id: ProfileId,
    pub primary_address: String,
    pub claimed_address: String,
}

pub struct OwnershipProofService {
    secret: Zeroizing<Vec<u8>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl OwnershipProofService {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(secret, clock, Duration::seconds(CHALLENGE_TTL_SECS))
    }

    pub fn with_ttl(secret: &[u8], clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
            clock,
            ttl,
        }
    }

    /// Fresh random secret; tokens do not survive a restart.
    pub fn ephemeral(clock: Arc<dyn Clock>) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(&secret, clock)
    }

    fn mac(&self, claims_bytes: &[u8]) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| AuthError::Internal("invalid hmac key".into()))?;
        mac.update(TAG_DOMAIN);
        mac.update(claims_bytes);
        Ok(mac)
    }

    pub fn issue_challenge(
        &self,
        profile_id: &str,
        primary_address: &str,
    ) -> Result<ChallengeToken, AuthError> {
        let issued_at = self.clock.now();
        let claims = ChallengeClaims {
            profile_id: profile_id.to_string(),
            primary_address: primary_address.to_string(),
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        let claims_bytes =
            bincode::serialize(&claims).map_err(|e| AuthError::Internal(e.to_string()))?;
        let tag = self.mac(&claims_bytes)?.finalize().into_bytes().to_vec();

        let encoded = format!(
            "{}{TOKEN_SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(&claims_bytes),
            URL_SAFE_NO_PAD.encode(&tag)
        );
        debug!(target: "ownership", profile_id, expires_at = %claims.expires_at, "issued link challenge");

        Ok(ChallengeToken {
            profile_id: claims.profile_id,
            primary_address: claims.primary_address,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
            integrity_tag: tag,
            encoded,
        })
    }

    /// Tag check, then expiry. Profile binding is checked by the caller of
    /// this function so that a forged token never reaches that comparison.
    pub fn open_challenge(&self, token: &str) -> Result<ChallengeToken, AuthError> {
        let (claims_part, tag_part) = token
            .split_once(TOKEN_SEPARATOR)
            .ok_or(AuthError::ChallengeInvalid)?;
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_part)
            .map_err(|_| AuthError::ChallengeInvalid)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_part)
            .map_err(|_| AuthError::ChallengeInvalid)?;

        self.mac(&claims_bytes)?
            .verify_slice(&tag)
            .map_err(|_| AuthError::ChallengeInvalid)?;

        let claims: ChallengeClaims =
            bincode::deserialize(&claims_bytes).map_err(|_| AuthError::ChallengeInvalid)?;
        if self.clock.now() >= claims.expires_at {
            return Err(AuthError::ChallengeExpired);
        }

        Ok(ChallengeToken {
            profile_id: claims.profile_id,
            primary_address: claims.primary_address,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
            integrity_tag: tag,
            encoded: token.to_string(),
        })
    }

    /// Validates a signed, never-broadcast zero-value self-payment whose
    /// note carries `challenge_token`. Single shot: nothing here retries.
    pub fn verify_ownership_proof(
        &self,
        expected_profile_id: &str,
        claimed_address: &str,
        challenge_token: &str,
        signed_tx_bytes: &[u8],
    ) -> Result<ProofReceipt, AuthError> {
        let challenge = match self.open_challenge(challenge_token) {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "ownership", error = %e, "challenge rejected");
                return Err(e);
            }
        };
        if challenge.profile_id != expected_profile_id {
            warn!(target: "ownership", "challenge redeemed under a different profile");
            return Err(AuthError::ProfileMismatch);
        }

        let claimed_key =
            decode_account_address(claimed_address).ok_or(AuthError::AddressFormatInvalid)?;
        let stx = SignedTransaction::decode(signed_tx_bytes)?;
        let txn = &stx.txn;

        let matches = txn.tx_type == PAYMENT_TYPE
            && txn.snd.as_slice() == claimed_key.as_slice()
            && txn.rcv == txn.snd
            && txn.amt == 0
            && txn.note.as_slice() == challenge_token.as_bytes();
        if !matches {
            debug!(target: "ownership", "proof transaction does not match challenge");
            return Err(AuthError::ProofMismatch);
        }

        let sig: [u8; 64] = stx
            .sig
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::SignatureInvalid)?;
        if !verify_with_pubkey(&sig, &txn.signing_bytes()?, &claimed_key) {
            warn!(target: "ownership", "proof transaction signature invalid");
            return Err(AuthError::SignatureInvalid);
        }

        let tx_id = txn.tx_id()?;
        debug!(target: "ownership", tx_id = %tx_id, "ownership proof accepted");
        Ok(ProofReceipt {
            tx_id,
            profile_id: challenge.profile_id,
            primary_address: challenge.primary_address,
            claimed_address: claimed_address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;
    use chrono::Utc;

    fn service() -> OwnershipProofService {
        OwnershipProofService::new(&[42u8; 32], Arc::new(ManualClock::new(Utc::now())))
    }

    #[test]
    fn opened_token_matches_issued() {
        let s = service();
        let t = s.issue_challenge("profile-a", "0xabc").unwrap();
        let opened = s.open_challenge(t.as_str()).unwrap();
        assert_eq!(opened, t);
    }

    #[test]
    fn tampered_claims_fail_tag() {
        let s = service();
        let t = s.issue_challenge("profile-a", "0xabc").unwrap();
        let (claims, tag) = t.as_str().split_once('.').unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(claims).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(raw), tag);

        assert!(matches!(
            s.open_challenge(&forged).unwrap_err(),
            AuthError::ChallengeInvalid
        ));
    }

    #[test]
    fn other_secret_rejects_token() {
        let s = service();
        let other = OwnershipProofService::new(&[7u8; 32], Arc::new(ManualClock::new(Utc::now())));
        let t = s.issue_challenge("profile-a", "0xabc").unwrap();
        assert!(matches!(
            other.open_challenge(t.as_str()).unwrap_err(),
            AuthError::ChallengeInvalid
        ));
    }

    #[test]
    fn missing_separator_is_invalid() {
        assert!(matches!(
            service().open_challenge("no-dot-here").unwrap_err(),
            AuthError::ChallengeInvalid
        ));
    }
}
