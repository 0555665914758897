//! Webhook signature verification using HMAC-SHA256.
//!
//! Two senders sign their requests:
//!
//! - GitHub puts `sha256=<hex>` of HMAC-SHA256(secret, body) in the
//!   `X-Hub-Signature-256` header.
//! - Slack puts `v0=<hex>` of HMAC-SHA256(secret, `v0:{timestamp}:{body}`) in
//!   `X-Slack-Signature`, with the timestamp in `X-Slack-Request-Timestamp`.
//!   Requests whose timestamp is too far from the current time are rejected to
//!   stop replays.
//!
//! Verification is the first step of every inbound request; nothing in the
//! body is parsed until it passes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signing secret is empty")]
    EmptySecret,

    #[error("missing signature header")]
    Missing,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature mismatch")]
    Mismatch,

    #[error("request timestamp {timestamp} is outside the allowed window")]
    StaleTimestamp { timestamp: i64 },
}

/// Parses a GitHub signature header (e.g., "sha256=abc123...") into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
/// Never panics.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Parses a Slack signature header (`v0=<hex>`) into raw bytes.
pub fn parse_slack_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("v0=")?;
    hex::decode(hex_sig).ok()
}

/// Formats a signature as a GitHub-style header value (`sha256=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Formats a signature as a Slack-style header value (`v0=<hex>`).
pub fn format_slack_signature_header(signature: &[u8]) -> String {
    format!("v0={}", hex::encode(signature))
}

fn keyed_mac(secret: &[u8]) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }
    HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::EmptySecret)
}

/// Verifies a GitHub webhook signature against the payload and secret.
///
/// Uses constant-time comparison via the HMAC library.
///
/// # Arguments
///
/// * `payload` - The raw webhook payload bytes
/// * `signature_header` - The value of `X-Hub-Signature-256`, if present
/// * `secret` - The webhook secret configured in GitHub
///
/// # Errors
///
/// Returns a [`SignatureError`] when the secret is empty, the header is
/// absent or malformed, or the signature does not match.
pub fn verify_github_signature(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let mut mac = keyed_mac(secret)?;
    let header = signature_header.ok_or(SignatureError::Missing)?;
    let expected = parse_signature_header(header).ok_or(SignatureError::Malformed)?;

    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Verifies a Slack signed request.
///
/// `now` is the current unix time in seconds; `max_age_secs` bounds how far
/// the request timestamp may drift from it in either direction.
///
/// # Errors
///
/// Returns a [`SignatureError`] when the secret is empty, either header is
/// absent or malformed, the timestamp is outside the window, or the signature
/// does not match.
pub fn verify_slack_signature(
    payload: &[u8],
    timestamp_header: Option<&str>,
    signature_header: Option<&str>,
    secret: &[u8],
    now: i64,
    max_age_secs: u64,
) -> Result<(), SignatureError> {
    let mut mac = keyed_mac(secret)?;
    let timestamp_raw = timestamp_header.ok_or(SignatureError::Missing)?;
    let header = signature_header.ok_or(SignatureError::Missing)?;

    let timestamp: i64 = timestamp_raw
        .trim()
        .parse()
        .map_err(|_| SignatureError::Malformed)?;
    if now.abs_diff(timestamp) > max_age_secs {
        return Err(SignatureError::StaleTimestamp { timestamp });
    }

    let expected = parse_slack_signature_header(header).ok_or(SignatureError::Malformed)?;

    mac.update(b"v0:");
    mac.update(timestamp_raw.trim().as_bytes());
    mac.update(b":");
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Computes the HMAC-SHA256 of a payload, for building signed test requests.
#[cfg(test)]
pub(crate) fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Computes the Slack `v0` signature for a timestamp and body.
#[cfg(test)]
pub(crate) fn compute_slack_signature(timestamp: &str, payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut base = format!("v0:{}:", timestamp).into_bytes();
    base.extend_from_slice(payload);
    compute_signature(&base, secret)
}
