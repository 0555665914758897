//! Worker endpoint: the queue delivers jobs here.
//!
//! The status code is the only thing the queue looks at:
//!
//! - 2xx: done. Success, no-ops, configuration drops, permanent failures,
//!   and retryable failures on the final attempt.
//! - 503: retryable failure with attempts left; the queue redelivers.
//! - 401/403: the caller isn't the queue.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{Instrument, error, info, info_span, warn};

use super::{AppState, header_str, secrets_match};
use crate::processor::{Disposition, ProcessError, find_pr_links};
use crate::queue::{
    ATTEMPT_HEADER, Delivery, JobPayload, QUEUE_HEADER, WORKER_SECRET_HEADER, WebhookJob,
};

/// Handles one delivery from the queue.
pub async fn worker_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let settings = app_state.settings();

    let (Some(secret), Some(queue)) = (
        header_str(&headers, WORKER_SECRET_HEADER),
        header_str(&headers, QUEUE_HEADER),
    ) else {
        return (StatusCode::UNAUTHORIZED, "missing delivery headers").into_response();
    };
    if !secrets_match(secret, &settings.worker_secret) || queue != settings.queue_name {
        warn!(queue, "Rejected worker call");
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }

    let attempt = header_str(&headers, ATTEMPT_HEADER)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let job: WebhookJob = match serde_json::from_slice(&body) {
        Ok(job) => job,
        Err(e) => {
            // Redelivering the same bytes can't help.
            error!(error = %e, attempt, "Dropping undecodable job");
            return (StatusCode::OK, "dropped").into_response();
        }
    };

    let delivery = Delivery { job, attempt };
    let span = info_span!(
        "job",
        job_id = %delivery.job.id,
        correlation_id = %delivery.job.correlation_id,
        kind = delivery.job.payload.kind(),
        attempt = delivery.attempt,
    );
    handle_delivery(&app_state, &delivery).instrument(span).await
}

async fn handle_delivery(app_state: &AppState, delivery: &Delivery) -> Response {
    let deadline = app_state.settings().worker_deadline;
    let result = tokio::time::timeout(
        deadline,
        app_state.processor().process(&delivery.job, Utc::now()),
    )
    .await
    .unwrap_or_else(|_| {
        Err(ProcessError::TransientExternal(format!(
            "worker deadline of {:?} exceeded",
            deadline
        )))
    });

    let err = match result {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Job processed");
            return (StatusCode::OK, "ok").into_response();
        }
        Err(err) => err,
    };

    let (repo, pr) = job_subject(&delivery.job.payload);
    match err.disposition() {
        Disposition::Retry if !delivery.is_final_attempt() => {
            warn!(error = %err, "Job failed, will be retried");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
        Disposition::Retry => {
            error!(
                kind = delivery.job.payload.kind(),
                repo = repo.as_deref(),
                pr,
                max_attempts = delivery.job.max_attempts,
                error = %err,
                "Giving up on job after final attempt"
            );
            (StatusCode::OK, "gave up").into_response()
        }
        Disposition::Drop => {
            match &err {
                ProcessError::Configuration(e) => {
                    warn!(repo = repo.as_deref(), pr, reason = %e, "Dropping job: configuration")
                }
                _ => error!(
                    kind = delivery.job.payload.kind(),
                    repo = repo.as_deref(),
                    pr,
                    error_kind = err.kind(),
                    error = %err,
                    "Dropping job"
                ),
            }
            (StatusCode::OK, "dropped").into_response()
        }
    }
}

/// Best-effort repo and PR number for log context.
fn job_subject(payload: &JobPayload) -> (Option<String>, Option<u64>) {
    match payload {
        JobPayload::CodeHostEvent { payload, .. } => {
            let repo = payload
                .pointer("/repository/full_name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let pr = payload
                .pointer("/pull_request/number")
                .and_then(|v| v.as_u64());
            (repo, pr)
        }
        JobPayload::ManualLink { text, .. } => match find_pr_links(text).first() {
            Some(link) => (Some(link.repo.to_string()), Some(link.pr_number.0)),
            None => (None, None),
        },
        JobPayload::Unknown => (None, None),
    }
}
