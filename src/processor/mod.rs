//! Event processing.
//!
//! Turns a dequeued [`WebhookJob`] into store mutations and chat calls.
//! Every branch is safe to run again for the same job: posting is guarded
//! by the one-message-per-`(repo, pr, channel)` rule, reviews are keyed by
//! review ID, and reactions are reconciled rather than toggled.

pub mod error;

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::channel::{self, ChannelTarget};
use crate::chat::{ChatApi, opened_message};
use crate::queue::{JobPayload, WebhookJob};
use crate::reactions::{self, SyncReport};
use crate::store::{DocumentStore, InsertOutcome};
use crate::types::{
    ChannelId, ChatUserId, Closure, MessageOrigin, MessageTs, PrNumber, PrStatus,
    PullRequestRecord, Repo, RepoName, TrackedMessage,
};
use crate::webhooks::{
    CodeHostEvent, PrAction, PullRequestEvent, ReviewAction, ReviewEvent, parse_webhook,
};

pub use error::{ConfigurationError, Disposition, ProcessError};

static PR_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://github\.com/([A-Za-z0-9][A-Za-z0-9-]*)/([A-Za-z0-9_.-]+)/pull/(\d+)")
        .unwrap()
});

/// A pull request referenced by URL in chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrLink {
    pub repo: RepoName,
    pub pr_number: PrNumber,
    pub url: String,
}

/// Extracts distinct pull request links from message text, in order.
pub fn find_pr_links(text: &str) -> Vec<PrLink> {
    let mut seen = BTreeSet::new();
    let mut links = Vec::new();
    for caps in PR_URL_REGEX.captures_iter(text) {
        let Ok(repo) = RepoName::parse(&format!("{}/{}", &caps[1], &caps[2])) else {
            continue;
        };
        let Ok(number) = caps[3].parse::<u64>() else {
            continue;
        };
        let pr_number = PrNumber(number);
        if seen.insert((repo.clone(), pr_number)) {
            links.push(PrLink {
                url: format!("https://github.com/{}/pull/{}", repo, number),
                repo,
                pr_number,
            });
        }
    }
    links
}

/// What processing a job did, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A new message was posted and tracked.
    Posted { channel: ChannelId, ts: MessageTs },
    /// A tracked message already existed for the key; nothing was posted.
    Duplicate { channel: ChannelId },
    /// A user's message was tracked for one or more linked PRs.
    Linked { tracked: usize },
    /// Reactions were reconciled on this many messages.
    Synced { messages: usize },
    /// The event was recorded but there is nothing to update yet.
    Untracked,
    /// The job is valid but irrelevant (unknown type, action or kind).
    Ignored(&'static str),
}

pub struct Processor {
    store: Arc<dyn DocumentStore>,
    chat: Arc<dyn ChatApi>,
}

impl Processor {
    pub fn new(store: Arc<dyn DocumentStore>, chat: Arc<dyn ChatApi>) -> Self {
        Processor { store, chat }
    }

    /// Processes one job.
    ///
    /// # Errors
    ///
    /// See [`ProcessError::disposition`] for which errors the queue should
    /// retry.
    #[instrument(skip_all, fields(kind = job.payload.kind()))]
    pub async fn process(
        &self,
        job: &WebhookJob,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        match &job.payload {
            JobPayload::CodeHostEvent {
                event_type,
                payload,
            } => {
                let bytes = serde_json::to_vec(payload)
                    .map_err(|e| ProcessError::Validation(e.to_string()))?;
                match parse_webhook(event_type, &bytes)? {
                    Some(event) => self.handle_event(event, now).await,
                    None => {
                        debug!(event_type = %event_type, "Ignoring event");
                        Ok(ProcessOutcome::Ignored("unhandled event type or action"))
                    }
                }
            }
            JobPayload::ManualLink {
                channel,
                message_ts,
                author,
                text,
                ..
            } => {
                self.handle_manual_link(channel, message_ts, author, text, now)
                    .await
            }
            JobPayload::Unknown => {
                warn!("Dropping job of unknown kind");
                Ok(ProcessOutcome::Ignored("unknown job kind"))
            }
        }
    }

    async fn handle_event(
        &self,
        event: CodeHostEvent,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let repo = self.enabled_repo(event.repo()).await?;
        match event {
            CodeHostEvent::PullRequest(pr) => match pr.action {
                PrAction::Opened => self.handle_opened(&repo, &pr, now).await,
                PrAction::Closed => {
                    let closure = if pr.merged {
                        Closure::Merged
                    } else {
                        Closure::Closed
                    };
                    self.handle_closure(&pr, Some(closure), now).await
                }
                PrAction::Reopened => self.handle_closure(&pr, None, now).await,
            },
            CodeHostEvent::Review(review) => self.handle_review(&review, now).await,
        }
    }

    /// Loads the repo config, refusing unregistered and disabled repos.
    async fn enabled_repo(&self, name: &RepoName) -> Result<Repo, ProcessError> {
        match self.store.get_repo(name).await? {
            None => Err(ConfigurationError::RepoNotRegistered(name.clone()).into()),
            Some(repo) if !repo.enabled => {
                Err(ConfigurationError::RepoDisabled(name.clone()).into())
            }
            Some(repo) => Ok(repo),
        }
    }

    async fn channel_id(&self, target: ChannelTarget) -> Result<ChannelId, ProcessError> {
        match target {
            ChannelTarget::Id(id) => Ok(id),
            ChannelTarget::Name(name) => match self.chat.resolve_channel(&name).await? {
                Some(id) => Ok(id),
                None => Err(ProcessError::PermanentExternal(format!(
                    "channel #{} not found",
                    name
                ))),
            },
        }
    }

    async fn load_record(
        &self,
        repo: &RepoName,
        pr: PrNumber,
        now: DateTime<Utc>,
    ) -> Result<PullRequestRecord, ProcessError> {
        Ok(self
            .store
            .get_pull_request(repo, pr)
            .await?
            .unwrap_or_else(|| PullRequestRecord::new(repo.clone(), pr, now)))
    }

    /// Runs the synchronizer and turns leftover transient failures into a
    /// retryable error.
    async fn sync(
        &self,
        record: &PullRequestRecord,
        messages: Vec<TrackedMessage>,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, ProcessError> {
        let report = reactions::sync_pull_request(
            self.chat.as_ref(),
            self.store.as_ref(),
            record,
            messages,
            now,
        )
        .await;
        if report.has_transient() {
            return Err(ProcessError::TransientExternal(format!(
                "{} reaction update(s) failed transiently",
                report.transient.len()
            )));
        }
        Ok(report)
    }

    #[instrument(skip_all, fields(repo = %pr.repo, pr = %pr.pr_number))]
    async fn handle_opened(
        &self,
        repo: &Repo,
        pr: &PullRequestEvent,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let author = self
            .store
            .find_verified_user_by_login(&pr.author_login)
            .await?;
        let resolved = channel::resolve(&pr.body, repo, author.as_ref())?;
        let channel = self.channel_id(resolved.target).await?;

        if self
            .store
            .get_message(&pr.repo, pr.pr_number, &channel)
            .await?
            .is_some()
        {
            debug!(channel = %channel, "Already tracked, skipping post");
            return Ok(ProcessOutcome::Duplicate { channel });
        }

        let mention = author.as_ref().map(|u| u.chat_user_id.as_str());
        let ts = self
            .chat
            .post_message(&channel, &opened_message(pr, mention))
            .await?;

        let message = TrackedMessage {
            repo: pr.repo.clone(),
            pr_number: pr.pr_number,
            channel: channel.clone(),
            message_ts: ts.clone(),
            pr_url: pr.html_url.clone(),
            author: pr.author_login.clone(),
            origin: MessageOrigin::Posted,
            status: PrStatus::Opened,
            reactions: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };

        if let InsertOutcome::Existing(existing) = self.store.insert_message(&message).await? {
            // Another delivery won the race between our check and insert.
            warn!(
                channel = %channel,
                kept_ts = %existing.message_ts,
                orphaned_ts = %ts,
                "Concurrent post for the same PR and channel"
            );
            return Ok(ProcessOutcome::Duplicate { channel });
        }

        info!(
            channel = %channel,
            ts = %ts,
            source = resolved.source.as_str(),
            "Posted pull request"
        );

        // Reviews may have arrived before the opened event.
        if let Some(record) = self
            .store
            .get_pull_request(&pr.repo, pr.pr_number)
            .await?
            .filter(|r| !reactions::desired_reactions(r).is_empty())
        {
            self.sync(&record, vec![message], now).await?;
        }

        Ok(ProcessOutcome::Posted { channel, ts })
    }

    #[instrument(skip_all, fields(repo = %review.repo, pr = %review.pr_number, reviewer = %review.reviewer_login))]
    async fn handle_review(
        &self,
        review: &ReviewEvent,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let submitted_at = review.submitted_at.unwrap_or(now);
        let mut record = self.load_record(&review.repo, review.pr_number, now).await?;

        match review.action {
            ReviewAction::Submitted => {
                let Some(state) = review.state else {
                    debug!("Review state carries no emoji");
                    return Ok(ProcessOutcome::Ignored("review state without emoji"));
                };
                record.record_review(review.review_id, &review.reviewer_login, state, submitted_at);
            }
            ReviewAction::Dismissed => {
                record.dismiss_review(
                    review.review_id,
                    &review.reviewer_login,
                    review.state,
                    submitted_at,
                );
            }
        }
        record.updated_at = now;
        self.store.put_pull_request(&record).await?;

        self.sync_tracked(&record, now).await
    }

    #[instrument(skip_all, fields(repo = %pr.repo, pr = %pr.pr_number))]
    async fn handle_closure(
        &self,
        pr: &PullRequestEvent,
        closure: Option<Closure>,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let mut record = self.load_record(&pr.repo, pr.pr_number, now).await?;
        record.closure = closure;
        record.updated_at = now;
        self.store.put_pull_request(&record).await?;

        self.sync_tracked(&record, now).await
    }

    async fn sync_tracked(
        &self,
        record: &PullRequestRecord,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let messages = self
            .store
            .list_messages(&record.repo, record.pr_number)
            .await?;
        if messages.is_empty() {
            debug!("PR predates tracking, nothing to update");
            return Ok(ProcessOutcome::Untracked);
        }

        let report = self.sync(record, messages, now).await?;
        Ok(ProcessOutcome::Synced {
            messages: report.messages,
        })
    }

    #[instrument(skip_all, fields(channel = %channel, ts = %message_ts))]
    async fn handle_manual_link(
        &self,
        channel: &ChannelId,
        message_ts: &MessageTs,
        author: &ChatUserId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let links = find_pr_links(text);
        if links.is_empty() {
            return Ok(ProcessOutcome::Ignored("no pull request links"));
        }

        let mut tracked = 0;
        let mut first_config_error = None;
        let mut retry = None;

        for link in links {
            match self
                .track_link(&link, channel, message_ts, author, now)
                .await
            {
                Ok(true) => tracked += 1,
                Ok(false) => {}
                Err(ProcessError::Configuration(e)) => {
                    debug!(repo = %link.repo, error = %e, "Link to unconfigured repo");
                    first_config_error.get_or_insert(e);
                }
                Err(e @ ProcessError::TransientExternal(_)) => {
                    retry.get_or_insert(e);
                }
                Err(e) => {
                    warn!(repo = %link.repo, pr = %link.pr_number, error = %e, "Failed to track link");
                }
            }
        }

        if let Some(e) = retry {
            return Err(e);
        }
        match (tracked, first_config_error) {
            (0, Some(e)) => Err(e.into()),
            _ => Ok(ProcessOutcome::Linked { tracked }),
        }
    }

    /// Tracks the user's message for one linked PR. Returns false when the
    /// PR already has a different tracked message in this channel.
    async fn track_link(
        &self,
        link: &PrLink,
        channel: &ChannelId,
        message_ts: &MessageTs,
        author: &ChatUserId,
        now: DateTime<Utc>,
    ) -> Result<bool, ProcessError> {
        self.enabled_repo(&link.repo).await?;

        let message = TrackedMessage {
            repo: link.repo.clone(),
            pr_number: link.pr_number,
            channel: channel.clone(),
            message_ts: message_ts.clone(),
            pr_url: link.url.clone(),
            author: author.to_string(),
            origin: MessageOrigin::ManualLink,
            status: PrStatus::Opened,
            reactions: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };

        let message = match self.store.insert_message(&message).await? {
            InsertOutcome::Inserted => message,
            // Redelivery of this same job: sync again.
            InsertOutcome::Existing(existing) if existing.message_ts == *message_ts => existing,
            InsertOutcome::Existing(_) => {
                debug!(repo = %link.repo, pr = %link.pr_number, "PR already tracked in channel");
                return Ok(false);
            }
        };

        let record = self.load_record(&link.repo, link.pr_number, now).await?;
        self.sync(&record, vec![message], now).await?;
        Ok(true)
    }
}
