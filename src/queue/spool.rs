//! Filesystem-backed queue.
//!
//! Each job moves through states using marker files next to its envelope:
//!
//! ```text
//! <job-id>.json           - pending (contains the envelope)
//! <job-id>.json.proc      - claimed by the dispatcher
//! <job-id>.json.attempts  - failed delivery count (absent means 0)
//! <job-id>.json.done      - worker acknowledged
//! <job-id>.json.dead      - delivery ceiling reached
//! ```
//!
//! Envelopes and the attempt counter are written atomically. A `.proc`
//! without `.done` means the process died mid-delivery; those markers are
//! removed at startup so the job is delivered again.
//!
//! Finished jobs (`.done` or `.dead`) keep their files for a retention period
//! so a redelivered webhook still collides with its job ID. After that
//! [`cleanup_finished_jobs`] deletes them.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::persistence::{create_marker, fsync_dir, remove_temp_files_for, write_atomic};
use crate::types::JobId;

use super::job::WebhookJob;
use super::{JobHandle, QueueError, TaskQueue};

/// Errors from spool file operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate job ID: {0}")]
    DuplicateJob(JobId),

    #[error("invalid job ID: contains unsafe characters: {0}")]
    InvalidJobId(JobId),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

/// What is stored on disk: the job and where to deliver it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolEntry {
    pub target: String,
    pub job: WebhookJob,
}

/// Job IDs become file names, so path separators and leading dots are refused.
fn validate_job_id(job_id: &JobId) -> Result<()> {
    let id = job_id.as_str();
    if id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
    {
        return Err(SpoolError::InvalidJobId(job_id.clone()));
    }
    Ok(())
}

/// Handle to a job's files in the spool directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledJob {
    pub job_id: JobId,
    pub payload_path: PathBuf,
    pub spool_dir: PathBuf,
}

impl SpooledJob {
    pub fn new(spool_dir: &Path, job_id: JobId) -> Self {
        let payload_path = spool_dir.join(format!("{}.json", job_id.as_str()));
        SpooledJob {
            job_id,
            payload_path,
            spool_dir: spool_dir.to_path_buf(),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        self.payload_path.with_extension(format!("json.{suffix}"))
    }

    pub fn proc_marker_path(&self) -> PathBuf {
        self.sibling("proc")
    }

    pub fn done_marker_path(&self) -> PathBuf {
        self.sibling("done")
    }

    pub fn dead_marker_path(&self) -> PathBuf {
        self.sibling("dead")
    }

    pub fn attempts_path(&self) -> PathBuf {
        self.sibling("attempts")
    }

    /// Pending means the envelope exists and no terminal marker does.
    pub fn is_pending(&self) -> bool {
        self.payload_path.exists() && !self.is_done() && !self.is_dead()
    }

    pub fn is_processing(&self) -> bool {
        self.proc_marker_path().exists() && self.is_pending()
    }

    pub fn is_done(&self) -> bool {
        self.done_marker_path().exists()
    }

    pub fn is_dead(&self) -> bool {
        self.dead_marker_path().exists()
    }

    pub fn read_entry(&self) -> Result<SpoolEntry> {
        let bytes = std::fs::read(&self.payload_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Failed deliveries so far. An unreadable counter counts as zero.
    pub fn attempts(&self) -> u32 {
        std::fs::read_to_string(self.attempts_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Writes a job envelope into the spool.
///
/// # Errors
///
/// Returns [`SpoolError::DuplicateJob`] if a job with the same ID was already
/// spooled (pending or finished), or an IO/JSON error.
pub fn spool_job(spool_dir: &Path, entry: &SpoolEntry) -> Result<SpooledJob> {
    validate_job_id(&entry.job.id)?;
    std::fs::create_dir_all(spool_dir)?;

    let spooled = SpooledJob::new(spool_dir, entry.job.id.clone());
    if spooled.payload_path.exists() || spooled.is_done() || spooled.is_dead() {
        return Err(SpoolError::DuplicateJob(entry.job.id.clone()));
    }

    let bytes = serde_json::to_vec(entry)?;
    write_atomic(&spooled.payload_path, &bytes)?;
    Ok(spooled)
}

pub fn mark_processing(job: &SpooledJob) -> Result<()> {
    Ok(create_marker(&job.proc_marker_path())?)
}

pub fn mark_done(job: &SpooledJob) -> Result<()> {
    Ok(create_marker(&job.done_marker_path())?)
}

pub fn mark_dead(job: &SpooledJob) -> Result<()> {
    Ok(create_marker(&job.dead_marker_path())?)
}

/// Records a failed delivery and releases the claim. Returns the new count.
pub fn record_failed_attempt(job: &SpooledJob) -> Result<u32> {
    let attempts = job.attempts().saturating_add(1);
    write_atomic(&job.attempts_path(), attempts.to_string().as_bytes())?;

    match std::fs::remove_file(job.proc_marker_path()) {
        Ok(()) => fsync_dir(&job.spool_dir)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(attempts)
}

/// Removes every file belonging to a job. Missing files are ignored.
pub fn remove_job(job: &SpooledJob) -> Result<()> {
    for path in [
        job.done_marker_path(),
        job.dead_marker_path(),
        job.proc_marker_path(),
        job.attempts_path(),
        job.payload_path.clone(),
    ] {
        let _ = std::fs::remove_file(path);
    }
    remove_temp_files_for(&job.attempts_path())?;
    remove_temp_files_for(&job.payload_path)?;
    Ok(())
}

/// Deletes jobs whose `.done` or `.dead` marker is older than `retention`.
///
/// Returns how many jobs were removed. Pending jobs are never touched.
pub fn cleanup_finished_jobs(spool_dir: &Path, retention: Duration) -> Result<usize> {
    if !spool_dir.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        let finished = path
            .extension()
            .is_some_and(|e| e == "done" || e == "dead");
        if !finished {
            continue;
        }

        let expired = path
            .metadata()
            .and_then(|m| m.modified())
            .is_ok_and(|modified| modified < cutoff);
        if !expired {
            continue;
        }

        // <id>.json.done -> <id>.json -> <id>
        let Some(job_id) = path
            .file_stem()
            .and_then(|json| extract_job_id(Path::new(json)))
        else {
            continue;
        };
        remove_job(&SpooledJob::new(spool_dir, job_id))?;
        removed += 1;
    }

    if removed > 0 {
        fsync_dir(spool_dir)?;
        debug!(removed, "removed finished spool jobs");
    }
    Ok(removed)
}

/// Lists pending jobs, oldest first.
pub fn drain_pending(spool_dir: &Path) -> Result<Vec<SpooledJob>> {
    if !spool_dir.exists() {
        return Ok(Vec::new());
    }

    let mut pending: Vec<(SystemTime, SpooledJob)> = Vec::new();
    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(job_id) = extract_job_id(&path)
        {
            let job = SpooledJob::new(spool_dir, job_id);
            if job.is_pending() {
                let modified = path
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                pending.push((modified, job));
            }
        }
    }

    pending.sort_by(|(ta, a), (tb, b)| {
        ta.cmp(tb)
            .then_with(|| a.job_id.as_str().cmp(b.job_id.as_str()))
    });
    Ok(pending.into_iter().map(|(_, job)| job).collect())
}

/// Removes `.proc` markers left behind by a crash so those jobs are retried.
pub fn cleanup_interrupted_processing(spool_dir: &Path) -> Result<usize> {
    if !spool_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(spool_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "proc")
            && let Some(json_path) = path.file_stem()
            && let Some(job_id) = extract_job_id(Path::new(json_path))
        {
            let job = SpooledJob::new(spool_dir, job_id);
            if job.is_processing() && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        fsync_dir(spool_dir)?;
        debug!(removed, "cleared interrupted spool claims");
    }
    Ok(removed)
}

fn extract_job_id(path: &Path) -> Option<JobId> {
    let stem = path.file_stem()?.to_str()?;
    Some(JobId::new(stem))
}

/// [`TaskQueue`] backed by a spool directory.
///
/// Enqueueing only writes the envelope; delivery is done by
/// [`super::dispatch::Dispatcher`].
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    dir: PathBuf,
    name: String,
}

impl SpoolQueue {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        SpoolQueue {
            dir: dir.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl TaskQueue for SpoolQueue {
    async fn enqueue(
        &self,
        job: &WebhookJob,
        target: &str,
    ) -> std::result::Result<JobHandle, QueueError> {
        let dir = self.dir.clone();
        let entry = SpoolEntry {
            target: target.to_string(),
            job: job.clone(),
        };

        tokio::task::spawn_blocking(move || spool_job(&dir, &entry))
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))??;

        Ok(JobHandle {
            job_id: job.id.clone(),
            queue: self.name.clone(),
        })
    }
}
