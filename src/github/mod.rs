//! Code-host boundary.
//!
//! The relay only needs one thing from GitHub at runtime: turning an OAuth
//! authorization code into the identity of the user who granted it.

mod client;
mod error;

use async_trait::async_trait;

pub use client::{GitHubClient, OAuthApp};
pub use error::{GitHubApiError, GitHubErrorKind};

/// A GitHub user as reported by `GET /user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeHostIdentity {
    pub login: String,
    pub id: u64,
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Exchanges an OAuth code for the identity that authorized it.
    async fn exchange_code(&self, code: &str) -> Result<CodeHostIdentity, GitHubApiError>;

    /// The URL a user visits to authorize, carrying `state` through.
    fn authorize_url(&self, state: &str) -> String;
}
