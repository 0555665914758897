//! GitHub OAuth code exchange and identity lookup.

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::error::GitHubApiError;
use super::{CodeHost, CodeHostIdentity};

pub const DEFAULT_OAUTH_BASE: &str = "https://github.com";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// OAuth app credentials.
#[derive(Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl std::fmt::Debug for OAuthApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthApp")
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

/// Response from `POST /login/oauth/access_token`.
///
/// GitHub answers 200 even when the code is rejected, with `error` set.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// [`CodeHost`] backed by github.com.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    app: OAuthApp,
    oauth_base: String,
    api_base: String,
}

impl GitHubClient {
    pub fn new(app: OAuthApp) -> Self {
        Self::with_bases(app, DEFAULT_OAUTH_BASE, DEFAULT_API_BASE)
    }

    /// Points the client at different hosts (used by tests and GHES).
    pub fn with_bases(
        app: OAuthApp,
        oauth_base: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        GitHubClient {
            http: reqwest::Client::new(),
            app,
            oauth_base: oauth_base.into().trim_end_matches('/').to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn access_token(&self, code: &str) -> Result<String, GitHubApiError> {
        let response = self
            .http
            .post(format!("{}/login/oauth/access_token", self.oauth_base))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.app.client_id.as_str()),
                ("client_secret", self.app.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.app.redirect_url.as_str()),
            ])
            .send()
            .await
            .map_err(GitHubApiError::from_reqwest)?
            .error_for_status()
            .map_err(GitHubApiError::from_reqwest)?;

        let body: TokenResponse = response.json().await.map_err(GitHubApiError::from_reqwest)?;
        match (body.access_token, body.error) {
            (Some(token), None) => Ok(token),
            (_, Some(error)) => Err(GitHubApiError::permanent(format!(
                "{}: {}",
                error,
                body.error_description.unwrap_or_default()
            ))),
            (None, None) => Err(GitHubApiError::permanent("token response had no access_token")),
        }
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("app", &self.app)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    fn authorize_url(&self, state: &str) -> String {
        let query = serde_urlencoded::to_string([
            ("client_id", self.app.client_id.as_str()),
            ("redirect_uri", self.app.redirect_url.as_str()),
            ("state", state),
            ("allow_signup", "false"),
        ])
        .unwrap_or_default();
        format!("{}/login/oauth/authorize?{}", self.oauth_base, query)
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<CodeHostIdentity, GitHubApiError> {
        let token = self.access_token(code).await?;

        let octocrab = Octocrab::builder()
            .base_uri(self.api_base.as_str())
            .map_err(GitHubApiError::from_octocrab)?
            .personal_token(token)
            .build()
            .map_err(GitHubApiError::from_octocrab)?;

        let user = octocrab
            .current()
            .user()
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        debug!(login = %user.login, "Resolved GitHub identity");

        Ok(CodeHostIdentity {
            login: user.login,
            id: user.id.0,
        })
    }
}
