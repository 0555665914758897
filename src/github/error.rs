//! GitHub error types.
//!
//! Distinguishes failures worth retrying from ones that need a person:
//!
//! - **Transient**: 5xx, rate limits, timeouts and connection failures.
//! - **Permanent**: everything else, including rejected OAuth codes.

use std::fmt;
use thiserror::Error;

/// The kind of GitHub error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    Transient,
    Permanent,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    pub message: String,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
        }
    }

    /// Categorizes by status code, falling back to the message text when the
    /// failure happened below HTTP.
    pub fn classify(status_code: Option<u16>, message: String) -> Self {
        let kind = match status_code {
            Some(429) => GitHubErrorKind::Transient,
            Some(403) if is_rate_limit_error(&message) => GitHubErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
            Some(_) => GitHubErrorKind::Permanent,
            None if is_network_error(&message) => GitHubErrorKind::Transient,
            None => GitHubErrorKind::Permanent,
        };
        Self {
            kind,
            status_code,
            message,
        }
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = match &err {
            octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
            _ => None,
        };
        Self::classify(status_code, err.to_string())
    }

    /// Categorizes a reqwest error from the OAuth endpoint.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::transient(err.to_string());
        }
        let status_code = err.status().map(|s| s.as_u16());
        Self::classify(status_code, err.to_string())
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("timed out")
        || message_lower.contains("connection")
        || message_lower.contains("dns")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_classification() {
        let kind = |code| GitHubApiError::classify(Some(code), "x".into()).kind;
        assert_eq!(kind(500), GitHubErrorKind::Transient);
        assert_eq!(kind(503), GitHubErrorKind::Transient);
        assert_eq!(kind(429), GitHubErrorKind::Transient);
        assert_eq!(kind(401), GitHubErrorKind::Permanent);
        assert_eq!(kind(404), GitHubErrorKind::Permanent);
        assert_eq!(kind(403), GitHubErrorKind::Permanent);
    }

    #[test]
    fn rate_limited_403_is_transient() {
        let err = GitHubApiError::classify(Some(403), "API rate limit exceeded".into());
        assert!(err.is_retriable());
    }

    #[test]
    fn network_failures_without_status_are_transient() {
        assert!(GitHubApiError::classify(None, "connection reset".into()).is_retriable());
        assert!(GitHubApiError::classify(None, "request timed out".into()).is_retriable());
        assert!(!GitHubApiError::classify(None, "bad_verification_code".into()).is_retriable());
    }

    #[test]
    fn display_includes_status() {
        let err = GitHubApiError::classify(Some(502), "bad gateway".into());
        assert_eq!(err.to_string(), "GitHub API error (HTTP 502): bad gateway");
        assert_eq!(
            GitHubApiError::permanent("nope").to_string(),
            "GitHub API error: nope"
        );
    }
}
