//! GitHub webhook event types.
//!
//! Typed representations of the two webhook events the relay acts on:
//!
//! - `pull_request` - lifecycle (opened, closed/merged, reopened)
//! - `pull_request_review` - review submitted or dismissed
//!
//! Everything else is ignored at parse time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, RepoName, ReviewId, ReviewState};

/// A parsed GitHub webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeHostEvent {
    PullRequest(PullRequestEvent),
    Review(ReviewEvent),
}

impl CodeHostEvent {
    /// Returns the repository this event belongs to.
    pub fn repo(&self) -> &RepoName {
        match self {
            CodeHostEvent::PullRequest(e) => &e.repo,
            CodeHostEvent::Review(e) => &e.repo,
        }
    }

    /// Returns the pull request this event concerns.
    pub fn pr_number(&self) -> PrNumber {
        match self {
            CodeHostEvent::PullRequest(e) => e.pr_number,
            CodeHostEvent::Review(e) => e.pr_number,
        }
    }
}

/// Action performed on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrAction {
    Opened,
    /// Closed, merged or not; see [`PullRequestEvent::merged`].
    Closed,
    Reopened,
}

/// A pull request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub repo: RepoName,
    pub action: PrAction,
    pub pr_number: PrNumber,
    pub title: String,
    /// The PR description. Empty when GitHub sends `null`.
    pub body: String,
    pub html_url: String,
    pub author_login: String,
    /// Only meaningful for `closed`.
    pub merged: bool,
}

/// Action for pull request review events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Submitted,
    Dismissed,
}

/// A pull request review event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub repo: RepoName,
    pub action: ReviewAction,
    pub pr_number: PrNumber,
    pub pr_url: String,
    pub review_id: ReviewId,
    pub reviewer_login: String,
    /// `None` for states that carry no emoji (`pending`, `dismissed`).
    pub state: Option<ReviewState>,
    /// GitHub omits this for pending reviews.
    pub submitted_at: Option<DateTime<Utc>>,
}
