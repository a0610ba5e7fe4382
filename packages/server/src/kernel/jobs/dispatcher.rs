//! Maps job types to executors.
//!
//! Executors are plain async functions registered at startup; the dispatcher
//! deserializes the payload and hands them a [`JobContext`] carrying the
//! per-job logger, progress reporter, auth coordinator and cancellation
//! token. The queue registry never learns executor identities, which keeps
//! the queueing fleet and the domain layer decoupled.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::common::errors::JobError;
use crate::kernel::auth::AuthCoordinator;
use crate::kernel::clock::Rand;
use crate::kernel::logsink::JobLogger;

use super::backend::QueueBackend;
use super::job::JobType;

/// Capabilities shared by all executors.
pub struct ExecutorDeps {
    pub auth: Arc<AuthCoordinator>,
    pub rand: Arc<Rand>,
    /// For fetching remote image payloads.
    pub http: reqwest::Client,
}

/// Everything one job execution gets to see.
pub struct JobContext {
    pub job_id: String,
    pub tenant_id: String,
    pub parent_id: Option<String>,
    pub job_type: JobType,
    pub attempt: u32,
    pub logger: JobLogger,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
    pub deps: Arc<ExecutorDeps>,
}

/// Pushes progress to the authoritative job record; the backend fans it out
/// to observers.
#[derive(Clone)]
pub struct ProgressReporter {
    backend: Arc<dyn QueueBackend>,
    job_id: String,
}

impl ProgressReporter {
    pub fn new(backend: Arc<dyn QueueBackend>, job_id: String) -> Self {
        Self { backend, job_id }
    }

    pub async fn set(&self, progress: u8) {
        if let Err(e) = self.backend.update_progress(&self.job_id, progress).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "progress update failed");
        }
    }
}

type BoxedHandler = Box<
    dyn Fn(Value, JobContext) -> Pin<Box<dyn Future<Output = Result<Value, JobError>> + Send>>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<JobType, BoxedHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a job type. The payload is deserialized here
    /// so executors only ever see their typed input; a malformed payload is a
    /// non-retryable bad request.
    pub fn register<P, F, Fut>(&mut self, job_type: JobType, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, JobContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |value, ctx| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(value).map_err(|e| {
                    JobError::BadRequest(format!("invalid {job_type} payload: {e}"))
                })?;
                handler(payload, ctx).await
            })
        });
        self.handlers.insert(job_type, boxed);
    }

    pub async fn dispatch(
        &self,
        job_type: JobType,
        payload: Value,
        ctx: JobContext,
    ) -> Result<Value, JobError> {
        let handler = self
            .handlers
            .get(&job_type)
            .ok_or_else(|| JobError::Internal(format!("no executor registered for {job_type}")))?;
        handler(payload, ctx).await
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }
}
