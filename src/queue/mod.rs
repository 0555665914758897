//! Job model and queue adapter.
//!
//! Ingress turns a verified webhook into a [`WebhookJob`] and hands it to a
//! [`TaskQueue`]. The queue later POSTs the envelope to the worker endpoint
//! with the delivery headers below, redelivering on non-2xx responses until
//! the job's `max_attempts` is reached.

pub mod dispatch;
pub mod job;
pub mod spool;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::JobId;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use job::{Delivery, JobPayload, WebhookJob};
pub use spool::{SpoolError, SpoolQueue};

/// Redelivery count, 0 on first delivery.
pub const ATTEMPT_HEADER: &str = "x-relay-attempt";

/// Name of the queue the delivery came from.
pub const QUEUE_HEADER: &str = "x-relay-queue";

/// Shared secret proving the caller is the queue.
pub const WORKER_SECRET_HEADER: &str = "x-relay-worker-secret";

/// Errors from enqueueing.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Receipt for an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: JobId,
    pub queue: String,
}

/// A durable at-least-once queue that delivers jobs to an HTTP endpoint.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Durably accepts `job` for delivery to `target`.
    ///
    /// # Errors
    ///
    /// Any error means the job was not accepted; ingress reports it as a
    /// 5xx so the sender retries.
    async fn enqueue(&self, job: &WebhookJob, target: &str) -> Result<JobHandle, QueueError>;
}
