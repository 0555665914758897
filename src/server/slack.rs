//! Slack ingress: the Events API and the slash command.
//!
//! Both endpoints verify Slack's signed-request header before reading the
//! body. Message events that link to pull requests become `manual_link`
//! jobs; the slash command is answered inline with an ephemeral message.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::github::{IngressError, enqueue};
use super::{AppState, header_str};
use crate::channel::ChannelTarget;
use crate::commands::{Command, HELP_TEXT, parse_command};
use crate::processor::find_pr_links;
use crate::queue::{JobPayload, WebhookJob};
use crate::types::{ChannelId, ChatUserId, CorrelationId, JobId, MessageTs, User, WorkspaceId};
use crate::webhooks::verify_slack_signature;

const HEADER_TIMESTAMP: &str = "x-slack-request-timestamp";
const HEADER_SIGNATURE: &str = "x-slack-signature";

fn verify(app_state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), IngressError> {
    let settings = app_state.settings();
    verify_slack_signature(
        body,
        header_str(headers, HEADER_TIMESTAMP),
        header_str(headers, HEADER_SIGNATURE),
        settings.slack_signing_secret.as_bytes(),
        Utc::now().timestamp(),
        settings.slack_max_request_age_secs,
    )
    .map_err(|e| {
        warn!(error = %e, "Rejected Slack signature");
        IngressError::Authentication(e)
    })
}

// ─── Events API ───

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        event_id: String,
        event: MessageEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// Slack Events API endpoint.
///
/// # Response
///
/// - 200 OK: URL verification challenge, or the event was handled/ignored
/// - 202 Accepted: a message linking PRs was enqueued
/// - 400 Bad Request: body isn't an event envelope
/// - 401 Unauthorized: bad signature or stale timestamp
pub async fn slack_events_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressError> {
    verify(&app_state, &headers, &body)?;

    let envelope: EventEnvelope = serde_json::from_slice(&body)
        .map_err(|e| IngressError::InvalidPayload(e.to_string()))?;

    let (team_id, event_id, event) = match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            return Ok(Json(json!({ "challenge": challenge })).into_response());
        }
        EventEnvelope::EventCallback {
            team_id,
            event_id,
            event,
        } => (team_id, event_id, event),
        EventEnvelope::Other => return Ok(StatusCode::OK.into_response()),
    };

    // Edits, deletions and bot posts (including our own) carry a subtype or bot_id.
    if event.kind != "message" || event.subtype.is_some() || event.bot_id.is_some() {
        debug!(event_id, kind = %event.kind, "Ignoring Slack event");
        return Ok(StatusCode::OK.into_response());
    }
    let (Some(user), Some(text), Some(channel), Some(ts)) =
        (event.user, event.text, event.channel, event.ts)
    else {
        return Ok(StatusCode::OK.into_response());
    };
    if find_pr_links(&text).is_empty() {
        return Ok(StatusCode::OK.into_response());
    }

    let mut job = WebhookJob::new(
        JobPayload::ManualLink {
            workspace_id: WorkspaceId::new(team_id),
            channel: ChannelId::new(channel),
            message_ts: MessageTs::new(ts),
            author: ChatUserId::new(user),
            text,
        },
        app_state.settings().max_attempts,
        Utc::now(),
    )
    .with_correlation_id(CorrelationId::new(event_id.clone()));
    // Slack retries reuse the event ID.
    job.id = JobId::new(event_id);

    enqueue(&app_state, &job).await?;
    info!(job_id = %job.id, "Manual link enqueued");
    Ok(StatusCode::ACCEPTED.into_response())
}

// ─── Slash command ───

/// The form fields Slack sends with a slash command.
#[derive(Debug, Deserialize)]
pub struct SlashCommand {
    pub team_id: String,
    pub user_id: String,
    #[serde(default)]
    pub text: String,
}

fn ephemeral(text: impl Into<String>) -> Response {
    Json(json!({
        "response_type": "ephemeral",
        "text": text.into(),
    }))
    .into_response()
}

/// Slash command endpoint. Always answers 200 with an ephemeral message once
/// the signature checks out, so the user sees what happened.
pub async fn slack_commands_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressError> {
    verify(&app_state, &headers, &body)?;

    let form: SlashCommand = serde_urlencoded::from_bytes(&body)
        .map_err(|e| IngressError::InvalidPayload(e.to_string()))?;

    let command = match parse_command(&form.text) {
        Ok(command) => command,
        Err(e) => return Ok(ephemeral(format!("{}\n\n{}", e, HELP_TEXT))),
    };

    match run_command(&app_state, &form, command).await {
        Ok(reply) => Ok(ephemeral(reply)),
        Err(e) => {
            warn!(user = %form.user_id, error = %e, "Slash command failed");
            Ok(ephemeral("Something went wrong on our side. Please try again."))
        }
    }
}

#[instrument(skip_all, fields(workspace = %form.team_id, user = %form.user_id, command = ?command))]
async fn run_command(
    app_state: &AppState,
    form: &SlashCommand,
    command: Command,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let workspace = WorkspaceId::new(form.team_id.as_str());
    let user = ChatUserId::new(form.user_id.as_str());
    let linker = app_state.linker();
    let now = Utc::now();

    let reply = match command {
        Command::Help => HELP_TEXT.to_string(),
        Command::Link => {
            let request = linker.request_link(&workspace, &user, now).await?;
            let minutes = (request.expires_at - now).num_minutes().max(1);
            format!(
                "<{}|Connect your GitHub account>. The link expires in {} minutes.",
                request.authorize_url, minutes
            )
        }
        Command::Unlink => match linker.unlink(&workspace, &user, now).await? {
            Some(login) => format!("Unlinked GitHub account *{}*.", login),
            None => "You don't have a linked GitHub account.".to_string(),
        },
        Command::Channel(target) => {
            let channel = match target {
                ChannelTarget::Id(id) => id,
                ChannelTarget::Name(name) => match app_state.chat().resolve_channel(&name).await? {
                    Some(id) => id,
                    None => return Ok(format!("I couldn't find a channel called #{}.", name)),
                },
            };
            linker.set_channel(&workspace, &user, channel.clone(), now).await?;
            format!("Your pull requests will be posted to <#{}>.", channel)
        }
        Command::Status => describe(linker.status(&workspace, &user).await?.as_ref()),
    };
    Ok(reply)
}

fn describe(user: Option<&User>) -> String {
    let Some(user) = user else {
        return "You haven't set anything up yet. Try `link`.".to_string();
    };
    let identity = match (user.verified_login(), &user.pending_link) {
        (Some(login), _) => format!("Linked to GitHub as *{}*.", login),
        (None, Some(_)) => "A link request is pending.".to_string(),
        (None, None) => "Not linked to GitHub.".to_string(),
    };
    let channel = match &user.default_channel {
        Some(c) => format!("Default channel: <#{}>.", c),
        None => "No default channel.".to_string(),
    };
    format!("{}\n{}", identity, channel)
}
