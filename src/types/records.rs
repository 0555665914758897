//! Durable documents owned by the document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ids::{ChannelId, ChatUserId, MessageTs, PrNumber, RepoName, ReviewId, WorkspaceId};

/// An outstanding link request: a single-use state token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLink {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl PendingLink {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A chat user and their (possibly unverified) code-host binding.
///
/// Keyed by `(workspace_id, chat_user_id)`. Never hard-deleted: unlinking
/// clears `github_login` and `verified` but keeps the history fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub workspace_id: WorkspaceId,
    pub chat_user_id: ChatUserId,
    #[serde(default)]
    pub github_login: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub default_channel: Option<ChannelId>,
    #[serde(default)]
    pub pending_link: Option<PendingLink>,
    #[serde(default)]
    pub previous_usernames: Vec<String>,
    #[serde(default)]
    pub linked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unlinked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh, unverified user record.
    pub fn new(workspace_id: WorkspaceId, chat_user_id: ChatUserId, now: DateTime<Utc>) -> Self {
        User {
            workspace_id,
            chat_user_id,
            github_login: None,
            verified: false,
            default_channel: None,
            pending_link: None,
            previous_usernames: Vec::new(),
            linked_at: None,
            unlinked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The code-host login, only if it has been verified.
    pub fn verified_login(&self) -> Option<&str> {
        if self.verified {
            self.github_login.as_deref()
        } else {
            None
        }
    }
}

/// Per-repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub full_name: RepoName,
    #[serde(default)]
    pub default_channel: Option<ChannelId>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a tracked message came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Posted by the relay in response to an opened event.
    Posted,
    /// A user's own message containing a pull request link.
    ManualLink,
}

/// Status label shown for a tracked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Opened,
    Approved,
    ChangesRequested,
    Commented,
    Merged,
    Closed,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrStatus::Opened => "opened",
            PrStatus::Approved => "approved",
            PrStatus::ChangesRequested => "changes_requested",
            PrStatus::Commented => "commented",
            PrStatus::Merged => "merged",
            PrStatus::Closed => "closed",
        }
    }
}

/// A chat message kept in sync with one pull request.
///
/// `(repo, pr_number, channel)` identifies at most one tracked message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMessage {
    pub repo: RepoName,
    pub pr_number: PrNumber,
    pub channel: ChannelId,
    pub message_ts: MessageTs,
    pub pr_url: String,
    /// Chat user (manual links) or code-host login (posted messages).
    pub author: String,
    pub origin: MessageOrigin,
    pub status: PrStatus,
    /// Emoji the relay last applied, used when the chat API can't be read.
    #[serde(default)]
    pub reactions: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The state a submitted review carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
}

impl ReviewState {
    /// Parses the code host's review state string.
    ///
    /// Returns `None` for states that carry no emoji (`pending`, `dismissed`
    /// as a state, anything unknown).
    pub fn from_github(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "approved" => Some(ReviewState::Approved),
            "changes_requested" => Some(ReviewState::ChangesRequested),
            "commented" => Some(ReviewState::Commented),
            _ => None,
        }
    }

    pub fn status(&self) -> PrStatus {
        match self {
            ReviewState::Approved => PrStatus::Approved,
            ReviewState::ChangesRequested => PrStatus::ChangesRequested,
            ReviewState::Commented => PrStatus::Commented,
        }
    }
}

/// One review observed on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub reviewer: String,
    pub state: ReviewState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub dismissed: bool,
}

/// Terminal state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Closure {
    Merged,
    Closed,
}

impl Closure {
    pub fn status(&self) -> PrStatus {
        match self {
            Closure::Merged => PrStatus::Merged,
            Closure::Closed => PrStatus::Closed,
        }
    }
}

/// Aggregate review history for one pull request.
///
/// Reviews are keyed by the code host's review ID so redelivery is a no-op
/// and a dismissal, once seen, stays in effect regardless of event order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub repo: RepoName,
    pub pr_number: PrNumber,
    #[serde(default)]
    pub reviews: BTreeMap<ReviewId, ReviewRecord>,
    #[serde(default)]
    pub closure: Option<Closure>,
    pub updated_at: DateTime<Utc>,
}

impl PullRequestRecord {
    pub fn new(repo: RepoName, pr_number: PrNumber, now: DateTime<Utc>) -> Self {
        PullRequestRecord {
            repo,
            pr_number,
            reviews: BTreeMap::new(),
            closure: None,
            updated_at: now,
        }
    }

    /// Records a submitted review. A previously seen dismissal is kept.
    pub fn record_review(
        &mut self,
        id: ReviewId,
        reviewer: &str,
        state: ReviewState,
        submitted_at: DateTime<Utc>,
    ) {
        let dismissed = self.reviews.get(&id).is_some_and(|r| r.dismissed);
        self.reviews.insert(
            id,
            ReviewRecord {
                reviewer: reviewer.to_string(),
                state,
                submitted_at,
                dismissed,
            },
        );
    }

    /// Marks a review as dismissed.
    ///
    /// If the review has not been seen yet (the dismissal overtook the
    /// submission), a placeholder is stored so the later submission is
    /// recorded already dismissed.
    pub fn dismiss_review(
        &mut self,
        id: ReviewId,
        reviewer: &str,
        state: Option<ReviewState>,
        submitted_at: DateTime<Utc>,
    ) {
        match self.reviews.get_mut(&id) {
            Some(review) => review.dismissed = true,
            None => {
                self.reviews.insert(
                    id,
                    ReviewRecord {
                        reviewer: reviewer.to_string(),
                        state: state.unwrap_or(ReviewState::Commented),
                        submitted_at,
                        dismissed: true,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record() -> PullRequestRecord {
        PullRequestRecord::new(RepoName::parse("acme/widgets").unwrap(), PrNumber(42), at(0))
    }

    #[test]
    fn verified_login_requires_verification() {
        let mut user = User::new(WorkspaceId::new("T1"), ChatUserId::new("U1"), at(0));
        user.github_login = Some("alice".into());
        assert_eq!(user.verified_login(), None);
        user.verified = true;
        assert_eq!(user.verified_login(), Some("alice"));
    }

    #[test]
    fn pending_link_expiry_is_inclusive() {
        let link = PendingLink {
            token: "t".into(),
            expires_at: at(10),
        };
        assert!(!link.is_expired(at(9)));
        assert!(link.is_expired(at(10)));
    }

    #[test]
    fn review_state_parsing() {
        assert_eq!(
            ReviewState::from_github("APPROVED"),
            Some(ReviewState::Approved)
        );
        assert_eq!(
            ReviewState::from_github("changes_requested"),
            Some(ReviewState::ChangesRequested)
        );
        assert_eq!(ReviewState::from_github("pending"), None);
    }

    #[test]
    fn dismissal_is_sticky_across_resubmission() {
        let mut pr = record();
        pr.record_review(ReviewId(1), "bob", ReviewState::Approved, at(5));
        pr.dismiss_review(ReviewId(1), "bob", None, at(5));
        // Redelivered submission of the same review must not undo the dismissal.
        pr.record_review(ReviewId(1), "bob", ReviewState::Approved, at(5));
        assert!(pr.reviews[&ReviewId(1)].dismissed);
    }

    #[test]
    fn dismissal_before_submission_is_remembered() {
        let mut pr = record();
        pr.dismiss_review(ReviewId(9), "bob", Some(ReviewState::Approved), at(5));
        pr.record_review(ReviewId(9), "bob", ReviewState::Approved, at(5));
        let review = &pr.reviews[&ReviewId(9)];
        assert!(review.dismissed);
        assert_eq!(review.state, ReviewState::Approved);
    }

    #[test]
    fn tracked_message_serde_uses_snake_case() {
        let msg = TrackedMessage {
            repo: RepoName::parse("acme/widgets").unwrap(),
            pr_number: PrNumber(42),
            channel: ChannelId::new("C1"),
            message_ts: MessageTs::new("1.0"),
            pr_url: "https://github.com/acme/widgets/pull/42".into(),
            author: "alice".into(),
            origin: MessageOrigin::ManualLink,
            status: PrStatus::ChangesRequested,
            reactions: BTreeSet::new(),
            created_at: at(0),
            updated_at: at(0),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["origin"], "manual_link");
        assert_eq!(json["status"], "changes_requested");
        let back: TrackedMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
