//! GitHub webhook ingress.
//!
//! Verifies the signature, checks the payload is JSON with a repository,
//! and enqueues a `code_host_event` job. Nothing here touches Slack, so the
//! response time is bounded by the enqueue deadline alone.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{AppState, header_str};
use crate::queue::{JobPayload, QueueError, SpoolError, WebhookJob};
use crate::types::{CorrelationId, JobId, RepoName};
use crate::webhooks::{SignatureError, is_relevant_event, verify_github_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("authentication failed: {0}")]
    Authentication(#[from] SignatureError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown repository path: {0}")]
    UnknownRepoPath(String),

    #[error("timed out after {0:?}")]
    Deadline(std::time::Duration),

    #[error("store unavailable: {0}")]
    Store(String),

    #[error("enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::MissingHeader(_) | IngressError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            IngressError::Authentication(_) => StatusCode::UNAUTHORIZED,
            IngressError::UnknownRepoPath(_) => StatusCode::NOT_FOUND,
            IngressError::Deadline(_) | IngressError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            IngressError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Webhooks signed with the global secret.
///
/// # Response
///
/// - 202 Accepted: job enqueued (or a duplicate delivery)
/// - 200 OK: `ping`, or an event type the relay doesn't act on
/// - 400 Bad Request: missing event header or unusable payload
/// - 401 Unauthorized: bad or missing signature
/// - 5xx: the queue didn't accept the job in time; GitHub may redeliver
pub async fn github_webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressError> {
    let secret = app_state.settings().github_webhook_secret.clone();
    accept(&app_state, &headers, &body, &secret, None).await
}

/// Webhooks for one repository, signed with its own secret if it has one.
pub async fn github_repo_webhook_handler(
    State(app_state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressError> {
    let path = format!("{}/{}", owner, repo);
    let name = RepoName::parse(&path).map_err(|_| IngressError::UnknownRepoPath(path))?;

    let deadline = app_state.settings().ingress_deadline;
    let registered = tokio::time::timeout(deadline, app_state.store().get_repo(&name))
        .await
        .map_err(|_| IngressError::Deadline(deadline))?
        .map_err(|e| IngressError::Store(e.to_string()))?;

    let secret = registered
        .and_then(|r| r.webhook_secret)
        .unwrap_or_else(|| app_state.settings().github_webhook_secret.clone());

    accept(&app_state, &headers, &body, &secret, Some(&name)).await
}

async fn accept(
    app_state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    path_repo: Option<&RepoName>,
) -> Result<Response, IngressError> {
    let event_type =
        header_str(headers, HEADER_EVENT).ok_or(IngressError::MissingHeader(HEADER_EVENT))?;
    let delivery = header_str(headers, HEADER_DELIVERY);

    // Verify before parsing anything.
    if let Err(e) = verify_github_signature(
        body,
        header_str(headers, HEADER_SIGNATURE),
        secret.as_bytes(),
    ) {
        warn!(delivery, event_type, error = %e, "Rejected webhook signature");
        return Err(e.into());
    }

    if event_type == "ping" {
        return Ok((StatusCode::OK, "pong").into_response());
    }
    if !is_relevant_event(event_type) {
        debug!(delivery, event_type, "Ignoring event type");
        return Ok((StatusCode::OK, "Ignored").into_response());
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| IngressError::InvalidPayload(e.to_string()))?;
    let repo = payload
        .pointer("/repository/full_name")
        .and_then(|v| v.as_str())
        .and_then(|s| RepoName::parse(s).ok())
        .ok_or_else(|| IngressError::InvalidPayload("missing repository".into()))?;
    if let Some(expected) = path_repo.filter(|expected| **expected != repo) {
        return Err(IngressError::InvalidPayload(format!(
            "payload is for {}, path is for {}",
            repo, expected
        )));
    }

    let mut job = WebhookJob::new(
        JobPayload::CodeHostEvent {
            event_type: event_type.to_string(),
            payload,
        },
        app_state.settings().max_attempts,
        Utc::now(),
    );
    if let Some(delivery) = delivery.filter(|d| !d.is_empty()) {
        // GitHub's delivery ID doubles as the job ID so redeliveries collapse.
        job.id = JobId::new(delivery);
        job = job.with_correlation_id(CorrelationId::new(delivery));
    }

    enqueue(app_state, &job).await?;
    info!(
        job_id = %job.id,
        repo = %repo,
        event_type,
        "Webhook enqueued"
    );
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "job_id": job.id }))).into_response())
}

/// Enqueues under the ingress deadline. A duplicate job ID is success.
pub(super) async fn enqueue(app_state: &AppState, job: &WebhookJob) -> Result<(), IngressError> {
    let settings = app_state.settings();
    let deadline = settings.ingress_deadline;
    let result = tokio::time::timeout(
        deadline,
        app_state.queue().enqueue(job, &settings.worker_url),
    )
    .await
    .map_err(|_| {
        warn!(job_id = %job.id, "Enqueue exceeded ingress deadline");
        IngressError::Deadline(deadline)
    })?;

    match result {
        Ok(_) => Ok(()),
        Err(QueueError::Spool(SpoolError::DuplicateJob(id))) => {
            debug!(job_id = %id, "Duplicate delivery (idempotent)");
            Ok(())
        }
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Failed to enqueue job");
            Err(e.into())
        }
    }
}
