use chrono::SecondsFormat;

use crate::types::{AuthPayload, Timestamp};

pub const PREAMBLE: &str = "Sign in with your wallet";
pub const DEFAULT_STATEMENT: &str =
    "Sign this message to prove you control this wallet. It does not send a transaction or cost any fees.";

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The exact text a wallet signs at login.
///
/// Lines are joined by a single `\n` with no trailing newline. The field
/// order is fixed and an absent domain drops its line entirely; an absent
/// statement falls back to [`DEFAULT_STATEMENT`].
pub fn canonical_message(payload: &AuthPayload) -> String {
    let statement = payload
        .statement
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STATEMENT);

    let mut lines = vec![
        PREAMBLE.to_string(),
        statement.to_string(),
        format!("Nonce: {}", payload.nonce),
        format!("Issued At: {}", format_timestamp(&payload.issued_at)),
        format!("Expires At: {}", format_timestamp(&payload.expires_at)),
    ];
    if let Some(domain) = payload.domain.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("Domain: {domain}"));
    }
    lines.join("\n")
}

pub fn canonical_bytes(payload: &AuthPayload) -> Vec<u8> {
    canonical_message(payload).into_bytes()
}
