//! GitHub OAuth callback, the last step of `link`.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::AppState;
use crate::identity::LinkError;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by GitHub when the user declines.
    #[serde(default)]
    pub error: Option<String>,
}

impl IntoResponse for LinkError {
    fn into_response(self) -> Response {
        let status = match &self {
            LinkError::InvalidState | LinkError::IdentityMismatch { .. } => StatusCode::BAD_REQUEST,
            LinkError::CodeHost(e) if e.is_retriable() => StatusCode::BAD_GATEWAY,
            LinkError::CodeHost(_) => StatusCode::BAD_REQUEST,
            LinkError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            LinkError::InvalidState => {
                "This link has expired or was already used. Run `link` again in Slack."
            }
            LinkError::IdentityMismatch { .. } => "GitHub returned an account we can't use.",
            LinkError::CodeHost(_) => "GitHub didn't accept the authorization. Please try again.",
            LinkError::Store(_) => "Something went wrong on our side. Please try again.",
        };
        (status, message).into_response()
    }
}

pub async fn oauth_callback_handler(
    State(app_state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<(StatusCode, String), LinkError> {
    if let Some(error) = params.error {
        info!(error = %error, "User declined authorization");
        return Ok((
            StatusCode::OK,
            "Authorization was cancelled. Nothing was changed.".to_string(),
        ));
    }

    let code = params.code.unwrap_or_default();
    let state = params.state.unwrap_or_default();
    let user = app_state
        .linker()
        .complete_link(&code, &state, Utc::now())
        .await
        .inspect_err(|e| warn!(error = %e, "Link callback failed"))?;

    Ok((
        StatusCode::OK,
        format!(
            "Linked to GitHub as {}. You can close this tab.",
            user.github_login.unwrap_or_default()
        ),
    ))
}
