//! Subscription graph and selective event delivery.
//!
//! Rooms: `user:<tenant>` (every subscriber of the tenant), `job:<id>` and
//! `group:<parent>` (explicit watches). An event reaches a subscriber when it
//! is addressed to the user room (lifecycle events) or the subscriber watches
//! the job or its group — progress and log telemetry never floods the whole
//! tenant.
//!
//! The hub also projects every lifecycle event into a per-job state cache
//! ([`CachedJobState`]) so a late subscriber can replay last-known state and
//! recent log lines before its live tail begins.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::event_bus::EventBus;
use super::events::{JobEvent, JobEventKind};
use super::jobs::job::JobState;
use super::logsink::{LogEntry, LogRing};

/// Log lines replayed to a late subscriber.
const REPLAY_LOG_LINES: usize = 50;
/// How long a terminal projection stays queryable.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Per-subscriber channel depth; slow consumers drop events.
const SUBSCRIBER_BUFFER: usize = 256;

pub type SubscriberId = String;

struct Subscriber {
    tenant_id: String,
    watched_jobs: HashSet<String>,
    watched_groups: HashSet<String>,
    tx: mpsc::Sender<JobEvent>,
}

/// Last-known projection for one live (or recently terminal) job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedJobState {
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    logs: LogRing,
    #[serde(skip)]
    terminal_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    tenant_id: String,
    #[serde(skip)]
    parent_id: Option<String>,
    #[serde(skip)]
    job_type: Option<super::jobs::job::JobType>,
}

impl CachedJobState {
    pub fn recent_logs(&self) -> Vec<LogEntry> {
        self.logs.to_vec()
    }
}

struct HubInner {
    subscribers: DashMap<SubscriberId, Subscriber>,
    cache: DashMap<String, CachedJobState>,
    cache_ttl: Duration,
}

#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

impl FanoutHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                cache: DashMap::new(),
                cache_ttl: CACHE_TTL,
            }),
        }
    }

    /// Pump events from the bus into the hub until the bus closes.
    pub fn spawn(bus: &EventBus, hub: FanoutHub) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => hub.route(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "fanout hub lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Join the tenant's user room. Initial watches may be supplied at
    /// connect time; more can be added later with `monitor_job`/`monitor_group`.
    pub fn subscribe(
        &self,
        tenant_id: &str,
        jobs: impl IntoIterator<Item = String>,
        groups: impl IntoIterator<Item = String>,
    ) -> (SubscriberId, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4().to_string();
        let subscriber = Subscriber {
            tenant_id: tenant_id.to_string(),
            watched_jobs: jobs.into_iter().collect(),
            watched_groups: groups.into_iter().collect(),
            tx,
        };
        // Replay state for watches supplied up-front.
        let watched: Vec<String> = subscriber.watched_jobs.iter().cloned().collect();
        self.inner.subscribers.insert(id.clone(), subscriber);
        for job_id in watched {
            self.replay(&id, &job_id);
        }
        (id, rx)
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.inner.subscribers.remove(subscriber_id);
    }

    /// Watch one job. Returns false for an unknown subscriber. The cached
    /// projection and recent logs are replayed into the stream first.
    pub fn monitor_job(&self, subscriber_id: &str, job_id: &str) -> bool {
        let known = match self.inner.subscribers.get_mut(subscriber_id) {
            Some(mut subscriber) => {
                subscriber.watched_jobs.insert(job_id.to_string());
                true
            }
            None => false,
        };
        if known {
            self.replay(subscriber_id, job_id);
        }
        known
    }

    pub fn monitor_group(&self, subscriber_id: &str, parent_id: &str) -> bool {
        match self.inner.subscribers.get_mut(subscriber_id) {
            Some(mut subscriber) => {
                subscriber.watched_groups.insert(parent_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unmonitor_job(&self, subscriber_id: &str, job_id: &str) -> bool {
        match self.inner.subscribers.get_mut(subscriber_id) {
            Some(mut subscriber) => subscriber.watched_jobs.remove(job_id),
            None => false,
        }
    }

    pub fn unmonitor_group(&self, subscriber_id: &str, parent_id: &str) -> bool {
        match self.inner.subscribers.get_mut(subscriber_id) {
            Some(mut subscriber) => subscriber.watched_groups.remove(parent_id),
            None => false,
        }
    }

    pub fn cached(&self, job_id: &str) -> Option<CachedJobState> {
        self.inner.cache.get(job_id).map(|entry| entry.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliver an event to every subscriber the delivery rule selects, and
    /// keep the state cache current.
    pub fn route(&self, event: &JobEvent) {
        self.update_cache(event);

        // Child ids encode their group, so a group watch still matches when
        // an event carries no explicit parent tag.
        let group = event.parent_id.clone().or_else(|| {
            event
                .job_id
                .as_deref()
                .and_then(crate::common::id::parent_of)
                .map(String::from)
        });

        let mut closed = Vec::new();
        for entry in self.inner.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.tenant_id != event.tenant_id {
                continue;
            }
            let watched = event
                .job_id
                .as_ref()
                .map(|id| subscriber.watched_jobs.contains(id))
                .unwrap_or(false)
                || group
                    .as_ref()
                    .map(|id| subscriber.watched_groups.contains(id))
                    .unwrap_or(false);
            if !(watched || event.is_lifecycle()) {
                continue;
            }
            if subscriber.tx.is_closed() {
                closed.push(entry.key().clone());
                continue;
            }
            // Slow consumers drop events rather than stalling the hub.
            let _ = subscriber.tx.try_send(event.clone());
        }
        for id in closed {
            self.inner.subscribers.remove(&id);
        }
    }

    /// Drop expired terminal projections.
    pub fn cleanup(&self) {
        let ttl = chrono::Duration::milliseconds(self.inner.cache_ttl.as_millis() as i64);
        let now = Utc::now();
        self.inner.cache.retain(|_, cached| match cached.terminal_at {
            Some(at) => now - at < ttl,
            None => true,
        });
        self.inner
            .subscribers
            .retain(|_, subscriber| !subscriber.tx.is_closed());
    }

    fn update_cache(&self, event: &JobEvent) {
        let Some(job_id) = &event.job_id else { return };
        let mut cached = self
            .inner
            .cache
            .entry(job_id.clone())
            .or_insert_with(|| CachedJobState {
                state: JobState::Waiting,
                progress: 0,
                result: None,
                error: None,
                updated_at: event.timestamp,
                logs: LogRing::new(REPLAY_LOG_LINES),
                terminal_at: None,
                tenant_id: event.tenant_id.clone(),
                parent_id: event.parent_id.clone(),
                job_type: event.job_type,
            });
        cached.updated_at = event.timestamp;
        if cached.job_type.is_none() {
            cached.job_type = event.job_type;
        }
        match event.kind {
            JobEventKind::Added => cached.state = JobState::Waiting,
            JobEventKind::Started => {
                cached.state = JobState::Active;
                cached.progress = 0;
                cached.error = None;
            }
            JobEventKind::Progress => {
                if let Some(progress) = event.progress {
                    cached.progress = cached.progress.max(progress);
                }
            }
            JobEventKind::Completed => {
                cached.state = JobState::Completed;
                cached.progress = 100;
                cached.result = event.result.clone();
                cached.terminal_at = Some(event.timestamp);
            }
            JobEventKind::Failed => {
                cached.error = event.error.clone();
                if event.will_retry == Some(true) {
                    cached.state = JobState::Waiting;
                } else {
                    cached.state = JobState::Failed;
                    cached.terminal_at = Some(event.timestamp);
                }
            }
            JobEventKind::Stalled => cached.state = JobState::Stalled,
            JobEventKind::Log => {
                if let Some(entry) = &event.log {
                    cached.logs.push(entry.clone());
                }
            }
            JobEventKind::WorkerError => {}
        }
    }

    /// Push the last-known projection and recent logs for a job into one
    /// subscriber's stream.
    fn replay(&self, subscriber_id: &str, job_id: &str) {
        let Some(cached) = self.cached(job_id) else {
            return;
        };
        let Some(subscriber) = self.inner.subscribers.get(subscriber_id) else {
            return;
        };

        let snapshot = match cached.state {
            JobState::Completed => JobEvent::completed(
                &cached.tenant_id,
                job_id,
                cached.parent_id.as_deref(),
                None,
                cached.result.clone().unwrap_or(Value::Null),
            ),
            JobState::Failed => JobEvent::failed(
                &cached.tenant_id,
                job_id,
                cached.parent_id.as_deref(),
                None,
                cached.error.as_deref().unwrap_or("unknown error"),
                false,
            ),
            _ => JobEvent::progress(
                &cached.tenant_id,
                job_id,
                cached.parent_id.as_deref(),
                None,
                cached.progress,
            ),
        };
        let _ = subscriber.tx.try_send(snapshot);
        for entry in cached.recent_logs() {
            let event = JobEvent {
                kind: JobEventKind::Log,
                tenant_id: cached.tenant_id.clone(),
                job_id: Some(job_id.to_string()),
                parent_id: cached.parent_id.clone(),
                job_type: cached.job_type,
                timestamp: entry.timestamp,
                progress: None,
                result: None,
                error: None,
                will_retry: None,
                log: Some(entry),
            };
            let _ = subscriber.tx.try_send(event);
        }
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new()
    }
}
