//! Per-job log plumbing.
//!
//! A [`JobLogger`] is cheap to clone and synchronous to write: entries go
//! into an unbounded channel and a drain task appends them to the job's
//! bounded ring in the queue backend and publishes `job:log` on the event
//! bus. Executors receive their logger explicitly; code that can't is covered
//! by a task-local ambient sink scoped to the worker task, so concurrent
//! workers never cross-contaminate.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::event_bus::EventBus;
use super::events::JobEvent;
use super::jobs::backend::QueueBackend;
use super::jobs::job::JobType;

/// Default ring capacity per job.
pub const LOG_RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// `"job"` for worker-level lines, `"executor"` for executor lines,
    /// `"stdout"` for ambient captures.
    pub source: String,
}

/// Bounded ring of the most recent log entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

#[derive(Debug, Clone)]
pub struct JobLogMeta {
    pub job_id: String,
    pub tenant_id: String,
    pub parent_id: Option<String>,
    pub job_type: JobType,
}

struct LoggerInner {
    meta: JobLogMeta,
    tx: mpsc::UnboundedSender<LogEntry>,
}

/// Handle for writing one job's log stream.
#[derive(Clone)]
pub struct JobLogger {
    inner: Arc<LoggerInner>,
}

impl JobLogger {
    /// Create a logger plus its drain task. The drain finishes once every
    /// clone of the logger has been dropped, which is the flush point before
    /// the job is reported terminal.
    pub fn channel(
        meta: JobLogMeta,
        backend: Arc<dyn QueueBackend>,
        bus: EventBus,
    ) -> (JobLogger, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEntry>();
        let drain_meta = meta.clone();
        let drain = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = backend.append_log(&drain_meta.job_id, entry.clone()).await {
                    tracing::warn!(job_id = %drain_meta.job_id, error = %e, "failed to append job log");
                }
                bus.publish(JobEvent::log(&drain_meta, entry));
            }
        });
        (
            JobLogger {
                inner: Arc::new(LoggerInner { meta, tx }),
            },
            drain,
        )
    }

    pub fn meta(&self) -> &JobLogMeta {
        &self.inner.meta
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, source: &str) {
        let message = message.into();
        tracing::debug!(
            job_id = %self.inner.meta.job_id,
            tenant_id = %self.inner.meta.tenant_id,
            ?level,
            "{message}"
        );
        let _ = self.inner.tx.send(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            source: source.to_string(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, "job");
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, "job");
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, "job");
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, "job");
    }
}

tokio::task_local! {
    static CURRENT_JOB_LOGGER: JobLogger;
}

/// Run `fut` with `logger` installed as the task's ambient sink.
pub async fn with_job_logger<F>(logger: JobLogger, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_JOB_LOGGER.scope(logger, fut).await
}

/// Write to the current task's job log, if one is installed. Captured lines
/// are tagged `source = "stdout"`.
pub fn ambient(level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    let _ = CURRENT_JOB_LOGGER.try_with(|logger| logger.log(level, message.clone(), "stdout"));
}
