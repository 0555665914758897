//! Repository registration.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{AppState, header_str, secrets_match};
use crate::channel::{ChannelTarget, parse_channel_ref};
use crate::types::{ChannelId, Repo, RepoName};

const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Deserialize)]
pub struct RegisterRepo {
    pub full_name: String,
    /// `#name`, `<#C123|name>` or a channel ID.
    #[serde(default)]
    pub default_channel: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// What the endpoint echoes back. The secret itself is never returned.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoView {
    pub full_name: RepoName,
    pub default_channel: Option<ChannelId>,
    pub enabled: bool,
    pub has_webhook_secret: bool,
}

impl From<&Repo> for RepoView {
    fn from(repo: &Repo) -> Self {
        RepoView {
            full_name: repo.full_name.clone(),
            default_channel: repo.default_channel.clone(),
            enabled: repo.enabled,
            has_webhook_secret: repo.webhook_secret.is_some(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("missing admin key")]
    MissingKey,

    #[error("invalid admin key")]
    BadKey,

    #[error("{0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::MissingKey => StatusCode::UNAUTHORIZED,
            AdminError::BadKey => StatusCode::FORBIDDEN,
            AdminError::Invalid(_) => StatusCode::BAD_REQUEST,
            AdminError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Creates (201) or updates (200) a repository.
///
/// Fields left out of an update keep their stored values. The key is checked
/// before the body is parsed.
pub async fn register_repo_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RepoView>), AdminError> {
    let key = header_str(&headers, ADMIN_KEY_HEADER).ok_or(AdminError::MissingKey)?;
    if !secrets_match(key, &app_state.settings().admin_api_key) {
        warn!("Rejected admin key");
        return Err(AdminError::BadKey);
    }
    let request: RegisterRepo =
        serde_json::from_slice(&body).map_err(|e| AdminError::Invalid(e.to_string()))?;

    let name = RepoName::parse(&request.full_name)
        .map_err(|e| AdminError::Invalid(e.to_string()))?;
    let default_channel = match request.default_channel.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(resolve_channel(&app_state, raw).await?),
    };
    let webhook_secret = request
        .webhook_secret
        .filter(|s| !s.trim().is_empty());

    let now = Utc::now();
    let existing = app_state
        .store()
        .get_repo(&name)
        .await
        .map_err(|e| AdminError::Internal(e.to_string()))?;
    let created = existing.is_none();

    let repo = match existing {
        Some(mut repo) => {
            if default_channel.is_some() {
                repo.default_channel = default_channel;
            }
            if webhook_secret.is_some() {
                repo.webhook_secret = webhook_secret;
            }
            if let Some(enabled) = request.enabled {
                repo.enabled = enabled;
            }
            repo.updated_at = now;
            repo
        }
        None => Repo {
            full_name: name,
            default_channel,
            webhook_secret,
            enabled: request.enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
        },
    };

    app_state
        .store()
        .put_repo(&repo)
        .await
        .map_err(|e| AdminError::Internal(e.to_string()))?;
    info!(repo = %repo.full_name, created, enabled = repo.enabled, "Repository registered");

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(RepoView::from(&repo))))
}

async fn resolve_channel(app_state: &AppState, raw: &str) -> Result<ChannelId, AdminError> {
    match parse_channel_ref(raw) {
        Some(ChannelTarget::Id(id)) => Ok(id),
        Some(ChannelTarget::Name(name)) => app_state
            .chat()
            .resolve_channel(&name)
            .await
            .map_err(|e| AdminError::Internal(e.to_string()))?
            .ok_or_else(|| AdminError::Invalid(format!("channel #{} not found", name))),
        None => Err(AdminError::Invalid(format!("`{}` is not a channel", raw))),
    }
}
