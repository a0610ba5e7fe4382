//! Error taxonomy for the orchestration core.
//!
//! Executors never retry transient errors themselves; they raise and let the
//! queue apply its retry policy. `is_retryable` is the single classification
//! point the worker reports to the backend.

use std::time::Duration;

use crate::kernel::social::SocialError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Payload validation failed at intake.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Job, parent or category not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// All three auth methods failed for a job. Terminal.
    #[error("authentication exhausted: {0}")]
    AuthExhausted(String),

    /// A social-client call failed; retriable by queue policy.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Upstream rate limit; retriable with mandated backoff.
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    /// An upload payload exceeded the cap and could not be downscaled.
    /// Item-level, not job-level.
    #[error("blob too large: {size} bytes exceeds cap of {cap}")]
    BlobTooLarge { size: usize, cap: usize },

    /// Lease revoked; the job returns to waiting.
    #[error("job cancelled")]
    Cancelled,

    /// Missed lease renewals beyond the threshold.
    #[error("job stalled")]
    Stalled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Whether the queue should re-enqueue on this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Upstream(_)
                | JobError::RateLimited { .. }
                | JobError::Cancelled
                | JobError::Internal(_)
        )
    }

    /// Backoff mandated by the upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::RateLimited {
                retry_after: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl From<SocialError> for JobError {
    fn from(e: SocialError) -> Self {
        match e {
            SocialError::RateLimited { retry_after } => JobError::RateLimited { retry_after },
            other => JobError::Upstream(other.to_string()),
        }
    }
}
