//! Queue registry: one logical queue per `(tenant, jobType)`.
//!
//! Creating a queue subscribes to its backend observation stream and
//! projects the signals into tenant-tagged bus events; the worker pool for
//! the queue starts at the same time. Creating a pool on a queue that
//! already has one replaces it after a graceful close.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::kernel::event_bus::EventBus;
use crate::kernel::events::JobEvent;

use super::backend::{QueueBackend, QueueSignal};
use super::dispatcher::{Dispatcher, ExecutorDeps};
use super::job::JobType;
use super::worker::{WorkerPool, WorkerPoolConfig};

/// Deterministic queue naming: `bsky-<jobType>-<tenantId>`.
pub fn queue_name(tenant_id: &str, job_type: JobType) -> String {
    format!("bsky-{}-{}", job_type.as_str(), tenant_id)
}

struct QueueEntry {
    pool: Arc<WorkerPool>,
    projector: JoinHandle<()>,
}

pub struct QueueRegistry {
    backend: Arc<dyn QueueBackend>,
    dispatcher: Arc<Dispatcher>,
    deps: Arc<ExecutorDeps>,
    bus: EventBus,
    base_config: WorkerPoolConfig,
    queues: DashMap<(String, JobType), QueueEntry>,
}

impl QueueRegistry {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        dispatcher: Arc<Dispatcher>,
        deps: Arc<ExecutorDeps>,
        bus: EventBus,
        base_config: WorkerPoolConfig,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            deps,
            bus,
            base_config,
            queues: DashMap::new(),
        }
    }

    /// Lazily create the queue (projector + worker pool) and return its name.
    pub fn get_or_create(&self, tenant_id: &str, job_type: JobType) -> String {
        let key = (tenant_id.to_string(), job_type);
        let name = queue_name(tenant_id, job_type);
        self.queues.entry(key).or_insert_with(|| {
            self.build_entry(tenant_id, job_type, self.base_config.clone())
        });
        name
    }

    /// Create (or replace, after a graceful close) the pool for a queue with
    /// an explicit concurrency.
    pub async fn create_pool(&self, tenant_id: &str, job_type: JobType, concurrency: usize) {
        let key = (tenant_id.to_string(), job_type);
        let config = WorkerPoolConfig {
            concurrency,
            ..self.base_config.clone()
        };

        if let Some((_, entry)) = self.queues.remove(&key) {
            info!(queue = %entry.pool.queue(), "replacing worker pool");
            entry.pool.close().await;
            entry.projector.abort();
        }
        let entry = self.build_entry(tenant_id, job_type, config);
        self.queues.insert(key, entry);
    }

    /// Pre-create every queue for a tenant, typically when it connects live.
    pub async fn bootstrap_tenant(&self, tenant_id: &str, concurrency: usize) {
        for job_type in JobType::ALL {
            let key = (tenant_id.to_string(), job_type);
            if !self.queues.contains_key(&key) {
                self.create_pool(tenant_id, job_type, concurrency).await;
            }
        }
    }

    fn build_entry(
        &self,
        tenant_id: &str,
        job_type: JobType,
        config: WorkerPoolConfig,
    ) -> QueueEntry {
        let name = queue_name(tenant_id, job_type);
        let projector = self.spawn_projector(tenant_id.to_string(), job_type, &name);
        let pool = WorkerPool::spawn(
            name,
            tenant_id.to_string(),
            job_type,
            self.backend.clone(),
            self.dispatcher.clone(),
            self.deps.clone(),
            self.bus.clone(),
            config,
        );
        QueueEntry { pool, projector }
    }

    /// Project backend signals into tenant-tagged lifecycle events.
    fn spawn_projector(
        &self,
        tenant_id: String,
        job_type: JobType,
        queue: &str,
    ) -> JoinHandle<()> {
        let mut signals = self.backend.observe(queue);
        let bus = self.bus.clone();
        let queue = queue.to_string();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(signal) => {
                        let event = match signal {
                            QueueSignal::Completed {
                                job_id,
                                parent_id,
                                result,
                            } => JobEvent::completed(
                                &tenant_id,
                                &job_id,
                                parent_id.as_deref(),
                                Some(job_type),
                                result,
                            ),
                            QueueSignal::Failed {
                                job_id,
                                parent_id,
                                error,
                                will_retry,
                            } => JobEvent::failed(
                                &tenant_id,
                                &job_id,
                                parent_id.as_deref(),
                                Some(job_type),
                                &error,
                                will_retry,
                            ),
                            QueueSignal::Progress {
                                job_id,
                                parent_id,
                                progress,
                            } => JobEvent::progress(
                                &tenant_id,
                                &job_id,
                                parent_id.as_deref(),
                                Some(job_type),
                                progress,
                            ),
                            QueueSignal::Stalled { job_id, parent_id } => JobEvent::stalled(
                                &tenant_id,
                                &job_id,
                                parent_id.as_deref(),
                                Some(job_type),
                            ),
                        };
                        bus.publish(event);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(queue = %queue, missed, "queue observer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// `(queue name, tenant, job type)` for every live queue.
    pub fn queue_names(&self) -> Vec<(String, String, JobType)> {
        self.queues
            .iter()
            .map(|entry| {
                let (tenant, job_type) = entry.key().clone();
                (queue_name(&tenant, job_type), tenant, job_type)
            })
            .collect()
    }

    pub async fn shutdown(&self) {
        let keys: Vec<(String, JobType)> =
            self.queues.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.queues.remove(&key) {
                entry.pool.close().await;
                entry.projector.abort();
            }
        }
    }
}
