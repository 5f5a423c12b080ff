use thiserror::Error;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ErrAddressFormatInvalid = 1001,
    ErrInvalidKeyLength = 1002,
    ErrTransactionDecode = 1003,
    ErrUnsupportedChain = 1004,
    ErrBadRequest = 1005,

    ErrSignatureLengthInvalid = 1101,
    ErrSignatureMismatch = 1102,
    ErrSignatureInvalid = 1103,
    ErrChallengeInvalid = 1104,

    ErrNonceExpired = 1201,
    ErrPayloadExpired = 1202,
    ErrChallengeExpired = 1203,

    ErrNonceMismatch = 1301,
    ErrProofMismatch = 1302,
    ErrAddressAlreadyLinked = 1303,

    ErrNonceNotFound = 1401,
    ErrSessionNotFound = 1402,
    ErrProfileNotFound = 1403,

    ErrIdentityUnavailable = 1501,

    ErrProfileMismatch = 1601,
    ErrUserMismatch = 1602,

    ErrStore = 1901,
    ErrCorruptRecord = 1902,
    ErrInternal = 1903,
}

/// Coarse error classes. Only `Fatal` is unexpected; everything else is an
/// ordinary outcome of untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Crypto,
    Expired,
    Conflict,
    NotFound,
    ExternalService,
    Authorization,
    Fatal,
}

/// Failure reasons reported by signature verification. Kept `Copy` so a
/// `VerifyResult` can be matched and compared freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("address format invalid")]
    AddressFormatInvalid,
    #[error("signature length invalid")]
    SignatureLengthInvalid,
    #[error("signature mismatch")]
    SignatureMismatch,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("address format invalid")]
    AddressFormatInvalid,
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("transaction decode error: {0}")]
    TransactionDecode(String),
    #[error("chain {0} does not support this operation")]
    UnsupportedChain(String),
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("signature length invalid")]
    SignatureLengthInvalid,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("transaction signature invalid")]
    SignatureInvalid,
    #[error("challenge token invalid")]
    ChallengeInvalid,

    #[error("nonce expired")]
    NonceExpired,
    #[error("signed payload expired")]
    PayloadExpired,
    #[error("challenge token expired")]
    ChallengeExpired,

    #[error("nonce mismatch")]
    NonceMismatch,
    #[error("ownership proof does not match challenge")]
    ProofMismatch,
    #[error("address already linked to another profile")]
    AddressAlreadyLinked,

    #[error("nonce not found")]
    NonceNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("profile not found")]
    ProfileNotFound,

    #[error("identity provider unavailable or token rejected")]
    IdentityUnavailable,

    #[error("challenge issued for a different profile")]
    ProfileMismatch,
    #[error("session identity does not match provider identity")]
    UserMismatch,

    #[error("store error: {0}")]
    Store(String),
    #[error("corrupt record under {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> u16 {
        let code = match self {
            AuthError::AddressFormatInvalid => ErrorCode::ErrAddressFormatInvalid,
            AuthError::InvalidKeyLength { .. } => ErrorCode::ErrInvalidKeyLength,
            AuthError::TransactionDecode(_) => ErrorCode::ErrTransactionDecode,
            AuthError::UnsupportedChain(_) => ErrorCode::ErrUnsupportedChain,
            AuthError::BadRequest(_) => ErrorCode::ErrBadRequest,
            AuthError::SignatureLengthInvalid => ErrorCode::ErrSignatureLengthInvalid,
            AuthError::SignatureMismatch => ErrorCode::ErrSignatureMismatch,
            AuthError::SignatureInvalid => ErrorCode::ErrSignatureInvalid,
            AuthError::ChallengeInvalid => ErrorCode::ErrChallengeInvalid,
            AuthError::NonceExpired => ErrorCode::ErrNonceExpired,
            AuthError::PayloadExpired => ErrorCode::ErrPayloadExpired,
            AuthError::ChallengeExpired => ErrorCode::ErrChallengeExpired,
            AuthError::NonceMismatch => ErrorCode::ErrNonceMismatch,
            AuthError::ProofMismatch => ErrorCode::ErrProofMismatch,
            AuthError::AddressAlreadyLinked => ErrorCode::ErrAddressAlreadyLinked,
            AuthError::NonceNotFound => ErrorCode::ErrNonceNotFound,
            AuthError::SessionNotFound => ErrorCode::ErrSessionNotFound,
            AuthError::ProfileNotFound => ErrorCode::ErrProfileNotFound,
            AuthError::IdentityUnavailable => ErrorCode::ErrIdentityUnavailable,
            AuthError::ProfileMismatch => ErrorCode::ErrProfileMismatch,
            AuthError::UserMismatch => ErrorCode::ErrUserMismatch,
            AuthError::Store(_) => ErrorCode::ErrStore,
            AuthError::CorruptRecord { .. } => ErrorCode::ErrCorruptRecord,
            AuthError::Internal(_) => ErrorCode::ErrInternal,
        };
        code as u16
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::AddressFormatInvalid
            | AuthError::InvalidKeyLength { .. }
            | AuthError::TransactionDecode(_)
            | AuthError::UnsupportedChain(_)
            | AuthError::BadRequest(_) => ErrorCategory::Validation,
            AuthError::SignatureLengthInvalid
            | AuthError::SignatureMismatch
            | AuthError::SignatureInvalid
            | AuthError::ChallengeInvalid => ErrorCategory::Crypto,
            AuthError::NonceExpired | AuthError::PayloadExpired | AuthError::ChallengeExpired => {
                ErrorCategory::Expired
            }
            AuthError::NonceMismatch
            | AuthError::ProofMismatch
            | AuthError::AddressAlreadyLinked => ErrorCategory::Conflict,
            AuthError::NonceNotFound | AuthError::SessionNotFound | AuthError::ProfileNotFound => {
                ErrorCategory::NotFound
            }
            AuthError::IdentityUnavailable => ErrorCategory::ExternalService,
            AuthError::ProfileMismatch | AuthError::UserMismatch => ErrorCategory::Authorization,
            AuthError::Store(_) | AuthError::CorruptRecord { .. } | AuthError::Internal(_) => {
                ErrorCategory::Fatal
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    /// Text safe to show a client. Credential failures all read the same so
    /// callers cannot probe which part of a login was wrong.
    pub fn public_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Validation => "invalid request",
            ErrorCategory::Conflict if matches!(self, AuthError::AddressAlreadyLinked) => {
                "address already linked"
            }
            ErrorCategory::Fatal => "internal error",
            _ => "authentication failed",
        }
    }
}

impl From<VerifyError> for AuthError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::AddressFormatInvalid => AuthError::AddressFormatInvalid,
            VerifyError::SignatureLengthInvalid => AuthError::SignatureLengthInvalid,
            VerifyError::SignatureMismatch => AuthError::SignatureMismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_classified() {
        assert!(AuthError::Store("poisoned".into()).is_fatal());
        assert!(AuthError::CorruptRecord {
            key: "nonce/voi/x".into(),
            reason: "eof".into()
        }
        .is_fatal());
        assert!(!AuthError::NonceNotFound.is_fatal());
    }

    #[test]
    fn credential_failures_share_public_message() {
        let msgs = [
            AuthError::SignatureMismatch.public_message(),
            AuthError::NonceNotFound.public_message(),
            AuthError::NonceExpired.public_message(),
            AuthError::ProfileMismatch.public_message(),
        ];
        assert!(msgs.iter().all(|m| *m == "authentication failed"));
    }

    #[test]
    fn verify_error_converts_with_matching_code() {
        let e: AuthError = VerifyError::SignatureLengthInvalid.into();
        assert_eq!(e.code(), ErrorCode::ErrSignatureLengthInvalid as u16);
        assert_eq!(e.category(), ErrorCategory::Crypto);
    }
}
