//! The job envelope that crosses the ingress/worker boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, ChatUserId, CorrelationId, JobId, MessageTs, WorkspaceId};

/// One unit of deferred work.
///
/// Processing a job must be safe to repeat: the queue delivers at least once
/// and may reorder jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub id: JobId,
    pub correlation_id: CorrelationId,
    pub enqueued_at: DateTime<Utc>,
    /// Delivery ceiling declared to the queue.
    pub max_attempts: u32,
    pub payload: JobPayload,
}

impl WebhookJob {
    pub fn new(payload: JobPayload, max_attempts: u32, now: DateTime<Utc>) -> Self {
        WebhookJob {
            id: JobId::generate(),
            correlation_id: CorrelationId::generate(),
            enqueued_at: now,
            max_attempts,
            payload,
        }
    }

    /// Builder-style override for the correlation ID (e.g. the GitHub delivery ID).
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// What a job asks the worker to do.
///
/// Unrecognised kinds deserialize to [`JobPayload::Unknown`] so a newer
/// producer can't wedge an older worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// A verified GitHub webhook, kept raw so parsing happens on the worker.
    CodeHostEvent {
        event_type: String,
        payload: serde_json::Value,
    },

    /// A chat message that may contain pull request links.
    ManualLink {
        workspace_id: WorkspaceId,
        channel: ChannelId,
        message_ts: MessageTs,
        author: ChatUserId,
        text: String,
    },

    #[serde(other)]
    Unknown,
}

impl JobPayload {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::CodeHostEvent { .. } => "code_host_event",
            JobPayload::ManualLink { .. } => "manual_link",
            JobPayload::Unknown => "unknown",
        }
    }
}

/// A job as handed to the worker, with the queue's redelivery count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub job: WebhookJob,
    /// 0 on first delivery.
    pub attempt: u32,
}

impl Delivery {
    /// True when a failure now means the queue will not deliver again.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt.saturating_add(1) >= self.job.max_attempts
    }
}
