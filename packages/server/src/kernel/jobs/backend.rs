//! The durable queue backend contract.
//!
//! The backend owns authoritative job state, ordering (priority then FIFO),
//! delayed delivery, leases, stalled detection and retry backoff. The core
//! stays policy-light on purpose: workers claim, report and renew; everything
//! else is the backend's call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::common::errors::JobError;
use crate::kernel::logsink::LogEntry;

use super::job::{Job, JobState, JobType};

pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);
/// Stall detections before a job fails permanently.
pub const MAX_STALLED_COUNT: u32 = 2;

pub const RETAIN_COMPLETED_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const RETAIN_COMPLETED_COUNT: usize = 1000;
pub const RETAIN_FAILED_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const RETAIN_FAILED_COUNT: usize = 3000;

/// Exponential backoff for attempt `n` (1-based): base·2^(n-1), capped.
pub fn retry_backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Lower value claims earlier; ties break FIFO.
    pub priority: i32,
    pub delay_until: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub remove_on_complete_age: Duration,
    pub remove_on_complete_count: usize,
    pub remove_on_fail_age: Duration,
    pub remove_on_fail_count: usize,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay_until: None,
            attempts: DEFAULT_ATTEMPTS,
            remove_on_complete_age: RETAIN_COMPLETED_AGE,
            remove_on_complete_count: RETAIN_COMPLETED_COUNT,
            remove_on_fail_age: RETAIN_FAILED_AGE,
            remove_on_fail_count: RETAIN_FAILED_COUNT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    pub parent_id: Option<String>,
    pub payload: Value,
}

/// An exclusive lease on one job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub worker_token: String,
    pub lock_duration: Duration,
}

/// Observation stream for one queue.
#[derive(Debug, Clone)]
pub enum QueueSignal {
    Completed {
        job_id: String,
        parent_id: Option<String>,
        result: Value,
    },
    Failed {
        job_id: String,
        parent_id: Option<String>,
        error: String,
        will_retry: bool,
    },
    Progress {
        job_id: String,
        parent_id: Option<String>,
        progress: u8,
    },
    Stalled {
        job_id: String,
        parent_id: Option<String>,
    },
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn enqueue(&self, queue: &str, job: NewJob, opts: EnqueueOptions)
        -> Result<(), JobError>;

    /// Atomic at per-item granularity.
    async fn enqueue_batch(
        &self,
        queue: &str,
        items: Vec<(NewJob, EnqueueOptions)>,
    ) -> Result<(), JobError>;

    /// Block until a ready job is leased, or until `cancel` fires (`None`).
    async fn claim(
        &self,
        queue: &str,
        worker_token: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ClaimedJob>, JobError>;

    /// Extend the lease; required while active. Errs with [`JobError::Stalled`]
    /// if the lease was lost.
    async fn renew_lease(&self, job_id: &str, worker_token: &str) -> Result<(), JobError>;

    async fn complete(
        &self,
        job_id: &str,
        worker_token: &str,
        result: Value,
    ) -> Result<(), JobError>;

    /// The backend decides retry vs terminal from the attempt count and the
    /// `retryable` classification; `retry_after` overrides the default
    /// exponential backoff.
    async fn fail(
        &self,
        job_id: &str,
        worker_token: &str,
        error: &str,
        retryable: bool,
        retry_after: Option<Duration>,
    ) -> Result<(), JobError>;

    async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), JobError>;

    async fn append_log(&self, job_id: &str, entry: LogEntry) -> Result<(), JobError>;

    async fn get_job(&self, queue: &str, job_id: &str) -> Result<Option<Job>, JobError>;

    async fn list_by_state(&self, queue: &str, states: &[JobState])
        -> Result<Vec<Job>, JobError>;

    /// May scan.
    async fn list_by_parent(&self, queue: &str, parent_id: &str) -> Result<Vec<Job>, JobError>;

    fn observe(&self, queue: &str) -> broadcast::Receiver<QueueSignal>;

    async fn counts(&self, queue: &str) -> Result<HashMap<JobState, usize>, JobError>;
}
