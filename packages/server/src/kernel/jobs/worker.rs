//! Worker pool: bounded concurrency per queue.
//!
//! Each worker loops claim → run → report. While a job runs, a renewal
//! ticker extends the lease at a third of the lock duration, and the job's
//! logger is installed as the task-local ambient sink so nothing bleeds
//! between concurrent workers. The pool never force-kills a job; stalled
//! detection belongs to the backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::errors::JobError;
use crate::kernel::event_bus::EventBus;
use crate::kernel::events::JobEvent;
use crate::kernel::logsink::{self, JobLogMeta, JobLogger};

use super::backend::{ClaimedJob, QueueBackend};
use super::dispatcher::{Dispatcher, ExecutorDeps, JobContext, ProgressReporter};
use super::job::JobType;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub lock_duration: Duration,
    /// How long graceful shutdown waits for in-flight jobs.
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            lock_duration: super::backend::DEFAULT_LOCK_DURATION,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

pub struct WorkerPool {
    queue: String,
    tenant_id: String,
    job_type: JobType,
    backend: Arc<dyn QueueBackend>,
    dispatcher: Arc<Dispatcher>,
    deps: Arc<ExecutorDeps>,
    bus: EventBus,
    config: WorkerPoolConfig,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        queue: String,
        tenant_id: String,
        job_type: JobType,
        backend: Arc<dyn QueueBackend>,
        dispatcher: Arc<Dispatcher>,
        deps: Arc<ExecutorDeps>,
        bus: EventBus,
        config: WorkerPoolConfig,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            queue,
            tenant_id,
            job_type,
            backend,
            dispatcher,
            deps,
            bus,
            config,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        });

        let mut workers = pool.workers.lock().unwrap();
        for n in 0..pool.config.concurrency {
            let worker_token = format!("{}-w{n}-{}", pool.queue, Uuid::new_v4().simple());
            let this = pool.clone();
            workers.push(tokio::spawn(async move {
                this.worker_loop(worker_token).await;
            }));
        }
        drop(workers);

        info!(
            queue = %pool.queue,
            concurrency = pool.config.concurrency,
            "worker pool started"
        );
        pool
    }

    async fn worker_loop(&self, worker_token: String) {
        loop {
            match self
                .backend
                .claim(&self.queue, &worker_token, &self.shutdown)
                .await
            {
                Ok(None) => break,
                Ok(Some(claimed)) => self.process(claimed).await,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "claim failed");
                    self.bus
                        .publish(JobEvent::worker_error(&self.tenant_id, &e.to_string()));
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!(queue = %self.queue, worker = %worker_token, "worker stopped");
    }

    async fn process(&self, claimed: ClaimedJob) {
        let job = claimed.job;
        let worker_token = claimed.worker_token;

        self.bus.publish(JobEvent::started(
            &self.tenant_id,
            &job.id,
            job.parent_id.as_deref(),
            self.job_type,
        ));

        let (logger, drain) = JobLogger::channel(
            JobLogMeta {
                job_id: job.id.clone(),
                tenant_id: self.tenant_id.clone(),
                parent_id: job.parent_id.clone(),
                job_type: self.job_type,
            },
            self.backend.clone(),
            self.bus.clone(),
        );

        // Lease renewal at a third of the lock duration, stopped once the
        // terminal report is in.
        let renewal = CancellationToken::new();
        let renewal_task = {
            let renewal = renewal.clone();
            let backend = self.backend.clone();
            let job_id = job.id.clone();
            let token = worker_token.clone();
            let every = claimed.lock_duration / 3;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = renewal.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = backend.renew_lease(&job_id, &token).await {
                                warn!(job_id = %job_id, error = %e, "lease renewal failed");
                                break;
                            }
                        }
                    }
                }
            })
        };

        let ctx = JobContext {
            job_id: job.id.clone(),
            tenant_id: self.tenant_id.clone(),
            parent_id: job.parent_id.clone(),
            job_type: self.job_type,
            attempt: job.attempts,
            logger: logger.clone(),
            progress: ProgressReporter::new(self.backend.clone(), job.id.clone()),
            cancel: self.shutdown.child_token(),
            deps: self.deps.clone(),
        };

        logger.info(format!(
            "processing {} job (attempt {}/{})",
            self.job_type, job.attempts, job.max_attempts
        ));

        let result = logsink::with_job_logger(
            logger.clone(),
            self.dispatcher
                .dispatch(self.job_type, job.payload.clone(), ctx),
        )
        .await;

        match &result {
            Ok(_) => logger.info("job completed"),
            Err(e) => logger.error(format!("job failed: {e}")),
        }

        // Flush the log drain before the terminal report: the ring freezes
        // once the job leaves the active state.
        drop(logger);
        if let Err(e) = drain.await {
            warn!(job_id = %job.id, error = %e, "log drain task panicked");
        }

        let report = match result {
            Ok(value) => self.backend.complete(&job.id, &worker_token, value).await,
            Err(e) => {
                self.backend
                    .fail(
                        &job.id,
                        &worker_token,
                        &e.to_string(),
                        e.is_retryable(),
                        e.retry_after(),
                    )
                    .await
            }
        };
        if let Err(e) = report {
            // Lease lost mid-flight: the backend already rerouted the job.
            match e {
                JobError::Stalled => {
                    warn!(job_id = %job.id, "terminal report dropped, lease was lost")
                }
                other => error!(job_id = %job.id, error = %other, "terminal report failed"),
            }
        }

        renewal.cancel();
        let _ = renewal_task.await;
    }

    /// Stop claiming, then wait for in-flight workers up to the grace
    /// deadline. Unrenewed leases are recovered by the backend.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            if tokio::time::timeout(self.config.shutdown_grace, handle)
                .await
                .is_err()
            {
                warn!(queue = %self.queue, "worker did not stop within grace period");
            }
        }
        info!(queue = %self.queue, "worker pool closed");
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }
}
