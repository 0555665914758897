//! GitHub webhook payload parser.
//!
//! Parses raw webhook JSON into typed [`CodeHostEvent`] values. The parser
//! tolerates unknown fields; unknown event types and actions return
//! `Ok(None)` so the caller can acknowledge and drop them.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{PrNumber, RepoName, ReviewId, ReviewState};

use super::events::{
    CodeHostEvent, PrAction, PullRequestEvent, ReviewAction, ReviewEvent,
};

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has an invalid value.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
///
/// # Arguments
///
/// * `event_type` - The value of the `X-GitHub-Event` header
/// * `payload` - The raw JSON payload bytes
///
/// # Returns
///
/// * `Ok(Some(event))` - A known event type and action
/// * `Ok(None)` - Unknown event type or action (ignored, not an error)
/// * `Err(e)` - Malformed payload or missing required fields
pub fn parse_webhook(
    event_type: &str,
    payload: &[u8],
) -> Result<Option<CodeHostEvent>, ParseError> {
    match event_type {
        "pull_request" => {
            parse_pull_request(payload).map(|opt| opt.map(CodeHostEvent::PullRequest))
        }
        "pull_request_review" => {
            parse_pull_request_review(payload).map(|opt| opt.map(CodeHostEvent::Review))
        }
        _ => Ok(None),
    }
}

/// Returns true if the relay acts on this event type at all.
///
/// Used by ingress to acknowledge other events without enqueueing them.
pub fn is_relevant_event(event_type: &str) -> bool {
    matches!(event_type, "pull_request" | "pull_request_review")
}

// ─── Raw payload structures ───

#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

fn repo_name(raw: &RawRepository) -> Result<RepoName, ParseError> {
    RepoName::parse(&raw.full_name).map_err(|_| ParseError::InvalidField {
        field: "repository.full_name",
        value: raw.full_name.clone(),
    })
}

// ─── pull_request ───

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    merged: Option<bool>,
    user: RawUser,
}

fn parse_pull_request(payload: &[u8]) -> Result<Option<PullRequestEvent>, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "opened" => PrAction::Opened,
        "closed" => PrAction::Closed,
        "reopened" => PrAction::Reopened,
        // Labels, assignments, edits and pushes don't change what we show.
        _ => return Ok(None),
    };

    Ok(Some(PullRequestEvent {
        repo: repo_name(&raw.repository)?,
        action,
        pr_number: PrNumber(raw.pull_request.number),
        title: raw.pull_request.title,
        body: raw.pull_request.body.unwrap_or_default(),
        html_url: raw.pull_request.html_url,
        author_login: raw.pull_request.user.login,
        merged: raw.pull_request.merged.unwrap_or(false),
    }))
}

// ─── pull_request_review ───

#[derive(Debug, Deserialize)]
struct RawReviewPayload {
    action: String,
    review: RawReview,
    pull_request: RawReviewPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    id: u64,
    user: RawUser,
    state: String,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawReviewPullRequest {
    number: u64,
    html_url: String,
}

fn parse_pull_request_review(payload: &[u8]) -> Result<Option<ReviewEvent>, ParseError> {
    let raw: RawReviewPayload = serde_json::from_slice(payload)?;

    let action = match raw.action.as_str() {
        "submitted" => ReviewAction::Submitted,
        "dismissed" => ReviewAction::Dismissed,
        _ => return Ok(None),
    };

    Ok(Some(ReviewEvent {
        repo: repo_name(&raw.repository)?,
        action,
        pr_number: PrNumber(raw.pull_request.number),
        pr_url: raw.pull_request.html_url,
        review_id: ReviewId(raw.review.id),
        reviewer_login: raw.review.user.login,
        state: ReviewState::from_github(&raw.review.state),
        submitted_at: raw.review.submitted_at,
    }))
}
