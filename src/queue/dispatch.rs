//! Delivers spooled jobs to the worker endpoint.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::spool::{
    self, SpoolError, SpooledJob, cleanup_finished_jobs, cleanup_interrupted_processing,
    drain_pending,
};
use super::{ATTEMPT_HEADER, QUEUE_HEADER, WORKER_SECRET_HEADER};

/// How long finished jobs stay in the spool by default. Redeliveries of the
/// same webhook inside this window are still recognised as duplicates.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The worker answered 2xx.
    Delivered,
    /// Delivery failed and will be retried on a later tick.
    Failed { attempts: u32 },
    /// Delivery failed for the last allowed time.
    Dead { attempts: u32 },
}

/// Polls a spool directory and POSTs each pending job to its target.
pub struct Dispatcher {
    spool_dir: PathBuf,
    queue_name: String,
    worker_secret: String,
    http: reqwest::Client,
    poll_interval: Duration,
    retention: Duration,
}

impl Dispatcher {
    pub fn new(
        spool_dir: impl Into<PathBuf>,
        queue_name: impl Into<String>,
        worker_secret: impl Into<String>,
        http: reqwest::Client,
        poll_interval: Duration,
    ) -> Self {
        Dispatcher {
            spool_dir: spool_dir.into(),
            queue_name: queue_name.into(),
            worker_secret: worker_secret.into(),
            http,
            poll_interval,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Sets how long finished jobs are kept before the sweep deletes them.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Claims left over from a previous run are released first so those jobs
    /// are delivered again. Finished jobs past the retention period are swept
    /// at startup and then periodically.
    pub async fn run(self, shutdown: CancellationToken) {
        match cleanup_interrupted_processing(&self.spool_dir) {
            Ok(0) => {}
            Ok(n) => info!(released = n, "Released interrupted deliveries"),
            Err(e) => error!(error = %e, "Failed to release interrupted deliveries"),
        }

        info!(dir = %self.spool_dir.display(), "Dispatcher started");
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping dispatcher");
                    break;
                }
                _ = sweep.tick() => self.sweep_finished(),
                _ = tokio::time::sleep(self.poll_interval) => {
                    if let Err(e) = self.dispatch_pending(&shutdown).await {
                        error!(error = %e, "Error draining spool");
                    }
                }
            }
        }
    }

    /// Deletes finished jobs older than the retention period.
    pub fn sweep_finished(&self) {
        match cleanup_finished_jobs(&self.spool_dir, self.retention) {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Removed finished jobs from spool"),
            Err(e) => error!(error = %e, "Failed to sweep finished jobs"),
        }
    }

    /// Delivers every currently pending job once.
    pub async fn dispatch_pending(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Vec<DispatchOutcome>, SpoolError> {
        let pending = drain_pending(&self.spool_dir)?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "Dispatching pending jobs");
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for job in pending {
            if shutdown.is_cancelled() {
                break;
            }
            outcomes.push(self.dispatch_one(&job).await?);
        }
        Ok(outcomes)
    }

    #[instrument(skip(self, spooled), fields(job_id = %spooled.job_id))]
    async fn dispatch_one(&self, spooled: &SpooledJob) -> Result<DispatchOutcome, SpoolError> {
        spool::mark_processing(spooled)?;

        let entry = match spooled.read_entry() {
            Ok(entry) => entry,
            Err(SpoolError::Json(e)) => {
                // An envelope that can't be read will never deliver.
                error!(error = %e, "Unreadable spool entry, marking dead");
                spool::mark_dead(spooled)?;
                return Ok(DispatchOutcome::Dead { attempts: spooled.attempts() });
            }
            Err(e) => return Err(e),
        };

        let attempt = spooled.attempts();
        let response = self
            .http
            .post(&entry.target)
            .header(ATTEMPT_HEADER, attempt.to_string())
            .header(QUEUE_HEADER, &self.queue_name)
            .header(WORKER_SECRET_HEADER, &self.worker_secret)
            .json(&entry.job)
            .send()
            .await;

        let failure = match response {
            Ok(resp) if resp.status().is_success() => {
                spool::mark_done(spooled)?;
                debug!(attempt, "Delivered");
                return Ok(DispatchOutcome::Delivered);
            }
            Ok(resp) => format!("worker returned {}", resp.status()),
            Err(e) => e.to_string(),
        };

        let attempts = spool::record_failed_attempt(spooled)?;
        if attempts >= entry.job.max_attempts {
            spool::mark_dead(spooled)?;
            error!(
                attempts,
                kind = entry.job.payload.kind(),
                correlation_id = %entry.job.correlation_id,
                reason = %failure,
                "Delivery ceiling reached, job dropped"
            );
            Ok(DispatchOutcome::Dead { attempts })
        } else {
            warn!(attempts, reason = %failure, "Delivery failed, will retry");
            Ok(DispatchOutcome::Failed { attempts })
        }
    }
}
