//! Process-local queue backend.
//!
//! Implements the full [`QueueBackend`] contract: priority-then-FIFO
//! ordering, delayed jobs, exclusive leases, stall recovery during claim,
//! exponential retry backoff and bounded retention of terminal jobs.
//!
//! Locking: each queue guards its state with a plain mutex held only inside
//! synchronous blocks; queue signals are emitted after the lock is released.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use crate::common::errors::JobError;
use crate::kernel::clock::{Clock, SystemClock};
use crate::kernel::logsink::LogEntry;

use super::backend::{
    retry_backoff, ClaimedJob, EnqueueOptions, NewJob, QueueBackend, QueueSignal,
    DEFAULT_LOCK_DURATION, MAX_STALLED_COUNT,
};
use super::job::{Job, JobState};

const SIGNAL_CAPACITY: usize = 1024;
/// Poll tick while blocked in claim; drives delayed promotion and stall
/// recovery when no enqueue wakes the worker.
const CLAIM_TICK: Duration = Duration::from_millis(200);

struct Lease {
    worker_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueInner {
    seq: u64,
    /// `(priority, seq)` → job id. Lower priority value claims first.
    ready: BTreeMap<(i32, u64), String>,
    delayed: BTreeMap<(DateTime<Utc>, u64), String>,
    jobs: HashMap<String, Job>,
    opts: HashMap<String, EnqueueOptions>,
    leases: HashMap<String, Lease>,
    completed: VecDeque<String>,
    failed: VecDeque<String>,
}

struct QueueState {
    inner: Mutex<QueueInner>,
    notify: Notify,
    signals: broadcast::Sender<QueueSignal>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            signals: broadcast::channel(SIGNAL_CAPACITY).0,
        }
    }

    fn emit(&self, signals: Vec<QueueSignal>) {
        for signal in signals {
            let _ = self.signals.send(signal);
        }
    }
}

pub struct MemoryQueueBackend {
    queues: DashMap<String, Arc<QueueState>>,
    /// job id → queue name, for job-keyed operations.
    index: DashMap<String, String>,
    lock_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::with_lock_duration(DEFAULT_LOCK_DURATION)
    }

    pub fn with_lock_duration(lock_duration: Duration) -> Self {
        Self::with_clock(lock_duration, Arc::new(SystemClock))
    }

    pub fn with_clock(lock_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: DashMap::new(),
            index: DashMap::new(),
            lock_duration,
            clock,
        }
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }

    fn queue_of(&self, job_id: &str) -> Result<Arc<QueueState>, JobError> {
        let name = self
            .index
            .get(job_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))?;
        Ok(self.queue(&name))
    }

    /// Test helper: the raw stored job, wherever it lives.
    pub fn raw_job(&self, job_id: &str) -> Option<Job> {
        let state = self.queue_of(job_id).ok()?;
        let inner = state.inner.lock().unwrap();
        inner.jobs.get(job_id).cloned()
    }

    fn insert_locked(&self, inner: &mut QueueInner, queue: &str, job: NewJob, opts: EnqueueOptions) {
        let now = self.clock.now();
        inner.seq += 1;
        let seq = inner.seq;
        let record = Job::builder()
            .id(job.id.clone())
            .tenant_id(job.tenant_id)
            .job_type(job.job_type)
            .parent_id(job.parent_id)
            .max_attempts(opts.attempts)
            .priority(opts.priority)
            .payload(job.payload)
            .build();

        match opts.delay_until {
            Some(at) if at > now => {
                inner.delayed.insert((at, seq), job.id.clone());
            }
            _ => {
                inner.ready.insert((opts.priority, seq), job.id.clone());
            }
        }
        self.index.insert(job.id.clone(), queue.to_string());
        inner.opts.insert(job.id.clone(), opts);
        inner.jobs.insert(job.id, record);
    }

    fn promote_delayed(inner: &mut QueueInner, now: DateTime<Utc>) {
        let due: Vec<(DateTime<Utc>, u64)> = inner
            .delayed
            .range(..=(now, u64::MAX))
            .map(|(key, _)| *key)
            .collect();
        for key in due {
            if let Some(job_id) = inner.delayed.remove(&key) {
                let priority = inner
                    .jobs
                    .get(&job_id)
                    .map(|j| j.priority)
                    .unwrap_or_default();
                inner.seq += 1;
                let seq = inner.seq;
                inner.ready.insert((priority, seq), job_id);
            }
        }
    }

    /// Recover leases that were not renewed in time. A recovered job goes
    /// back to waiting unless it exceeded the stall threshold or its attempt
    /// budget, in which case it fails permanently.
    fn recover_expired(
        &self,
        inner: &mut QueueInner,
        now: DateTime<Utc>,
    ) -> Vec<QueueSignal> {
        let expired: Vec<String> = inner
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        let mut signals = Vec::new();
        for job_id in expired {
            inner.leases.remove(&job_id);
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                continue;
            };
            job.stalled_count += 1;
            signals.push(QueueSignal::Stalled {
                job_id: job_id.clone(),
                parent_id: job.parent_id.clone(),
            });

            if job.stalled_count >= MAX_STALLED_COUNT || job.attempts >= job.max_attempts {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.error = Some("job stalled more than allowable limit".to_string());
                signals.push(QueueSignal::Failed {
                    job_id: job_id.clone(),
                    parent_id: job.parent_id.clone(),
                    error: "job stalled more than allowable limit".to_string(),
                    will_retry: false,
                });
                inner.failed.push_back(job_id.clone());
                self.prune_terminal(inner, now);
            } else {
                job.state = JobState::Waiting;
                let priority = job.priority;
                inner.seq += 1;
                let seq = inner.seq;
                inner.ready.insert((priority, seq), job_id);
            }
        }
        signals
    }

    fn pop_ready(
        &self,
        inner: &mut QueueInner,
        now: DateTime<Utc>,
        worker_token: &str,
    ) -> Option<ClaimedJob> {
        let key = *inner.ready.keys().next()?;
        let job_id = inner.ready.remove(&key)?;
        let snapshot = {
            let job = inner.jobs.get_mut(&job_id)?;
            job.state = JobState::Active;
            job.attempts += 1;
            job.processed_at = Some(now);
            job.progress = 0;
            job.clone()
        };
        inner.leases.insert(
            job_id,
            Lease {
                worker_token: worker_token.to_string(),
                expires_at: now + chrono_dur(self.lock_duration),
            },
        );
        Some(ClaimedJob {
            job: snapshot,
            worker_token: worker_token.to_string(),
            lock_duration: self.lock_duration,
        })
    }

    fn take_lease(
        inner: &mut QueueInner,
        job_id: &str,
        worker_token: &str,
    ) -> Result<(), JobError> {
        match inner.leases.get(job_id) {
            Some(lease) if lease.worker_token == worker_token => {
                inner.leases.remove(job_id);
                Ok(())
            }
            _ => Err(JobError::Stalled),
        }
    }

    /// Evict terminal jobs past the retention caps. Uses each evicted job's
    /// own enqueue options, oldest first.
    fn prune_terminal(&self, inner: &mut QueueInner, now: DateTime<Utc>) {
        for completed_set in [true, false] {
            loop {
                let (deque_len, oldest) = {
                    let deque = if completed_set {
                        &inner.completed
                    } else {
                        &inner.failed
                    };
                    (deque.len(), deque.front().cloned())
                };
                let Some(oldest) = oldest else { break };
                let Some(opts) = inner.opts.get(&oldest) else {
                    if completed_set {
                        inner.completed.pop_front();
                    } else {
                        inner.failed.pop_front();
                    }
                    continue;
                };
                let (max_count, max_age) = if completed_set {
                    (opts.remove_on_complete_count, opts.remove_on_complete_age)
                } else {
                    (opts.remove_on_fail_count, opts.remove_on_fail_age)
                };
                let too_old = inner
                    .jobs
                    .get(&oldest)
                    .and_then(|j| j.finished_at)
                    .map(|at| now - at > chrono_dur(max_age))
                    .unwrap_or(true);
                if deque_len > max_count || too_old {
                    if completed_set {
                        inner.completed.pop_front();
                    } else {
                        inner.failed.pop_front();
                    }
                    inner.jobs.remove(&oldest);
                    inner.opts.remove(&oldest);
                    self.index.remove(&oldest);
                } else {
                    break;
                }
            }
        }
    }
}

impl Default for MemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn chrono_dur(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(
        &self,
        queue: &str,
        job: NewJob,
        opts: EnqueueOptions,
    ) -> Result<(), JobError> {
        let state = self.queue(queue);
        {
            let mut inner = state.inner.lock().unwrap();
            self.insert_locked(&mut inner, queue, job, opts);
        }
        state.notify.notify_waiters();
        Ok(())
    }

    async fn enqueue_batch(
        &self,
        queue: &str,
        items: Vec<(NewJob, EnqueueOptions)>,
    ) -> Result<(), JobError> {
        let state = self.queue(queue);
        {
            let mut inner = state.inner.lock().unwrap();
            for (job, opts) in items {
                self.insert_locked(&mut inner, queue, job, opts);
            }
        }
        state.notify.notify_waiters();
        Ok(())
    }

    async fn claim(
        &self,
        queue: &str,
        worker_token: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ClaimedJob>, JobError> {
        let state = self.queue(queue);
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let (claimed, signals) = {
                let mut inner = state.inner.lock().unwrap();
                let now = self.clock.now();
                Self::promote_delayed(&mut inner, now);
                let signals = self.recover_expired(&mut inner, now);
                (self.pop_ready(&mut inner, now, worker_token), signals)
            };
            state.emit(signals);

            if let Some(claimed) = claimed {
                return Ok(Some(claimed));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = state.notify.notified() => {}
                _ = tokio::time::sleep(CLAIM_TICK) => {}
            }
        }
    }

    async fn renew_lease(&self, job_id: &str, worker_token: &str) -> Result<(), JobError> {
        let state = self.queue_of(job_id)?;
        let mut inner = state.inner.lock().unwrap();
        match inner.leases.get_mut(job_id) {
            Some(lease) if lease.worker_token == worker_token => {
                lease.expires_at = self.clock.now() + chrono_dur(self.lock_duration);
                Ok(())
            }
            _ => Err(JobError::Stalled),
        }
    }

    async fn complete(
        &self,
        job_id: &str,
        worker_token: &str,
        result: Value,
    ) -> Result<(), JobError> {
        let state = self.queue_of(job_id)?;
        let signal = {
            let mut inner = state.inner.lock().unwrap();
            Self::take_lease(&mut inner, job_id, worker_token)?;
            let now = self.clock.now();
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))?;
            job.state = JobState::Completed;
            job.progress = 100;
            job.finished_at = Some(now);
            job.result = Some(result.clone());
            let parent_id = job.parent_id.clone();
            inner.completed.push_back(job_id.to_string());
            self.prune_terminal(&mut inner, now);
            QueueSignal::Completed {
                job_id: job_id.to_string(),
                parent_id,
                result,
            }
        };
        state.emit(vec![signal]);
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        worker_token: &str,
        error: &str,
        retryable: bool,
        retry_after: Option<Duration>,
    ) -> Result<(), JobError> {
        let state = self.queue_of(job_id)?;
        let signal = {
            let mut inner = state.inner.lock().unwrap();
            Self::take_lease(&mut inner, job_id, worker_token)?;
            let now = self.clock.now();
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))?;
            job.error = Some(error.to_string());
            let parent_id = job.parent_id.clone();
            let will_retry = retryable && job.attempts < job.max_attempts;

            if will_retry {
                job.state = JobState::Waiting;
                let delay = retry_after.unwrap_or_else(|| retry_backoff(job.attempts));
                let priority = job.priority;
                inner.seq += 1;
                let seq = inner.seq;
                if delay.is_zero() {
                    inner.ready.insert((priority, seq), job_id.to_string());
                } else {
                    inner
                        .delayed
                        .insert((now + chrono_dur(delay), seq), job_id.to_string());
                }
            } else {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                inner.failed.push_back(job_id.to_string());
                self.prune_terminal(&mut inner, now);
            }
            QueueSignal::Failed {
                job_id: job_id.to_string(),
                parent_id,
                error: error.to_string(),
                will_retry,
            }
        };
        state.emit(vec![signal]);
        state.notify.notify_waiters();
        Ok(())
    }

    async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), JobError> {
        let state = self.queue_of(job_id)?;
        let signal = {
            let mut inner = state.inner.lock().unwrap();
            let job = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))?;
            if job.state != JobState::Active {
                return Ok(());
            }
            job.record_progress(progress);
            QueueSignal::Progress {
                job_id: job_id.to_string(),
                parent_id: job.parent_id.clone(),
                progress: job.progress,
            }
        };
        state.emit(vec![signal]);
        Ok(())
    }

    async fn append_log(&self, job_id: &str, entry: LogEntry) -> Result<(), JobError> {
        // Logs for evicted or unknown jobs are dropped silently.
        let Ok(state) = self.queue_of(job_id) else {
            return Ok(());
        };
        let mut inner = state.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(job_id) {
            job.append_log(entry);
        }
        Ok(())
    }

    async fn get_job(&self, queue: &str, job_id: &str) -> Result<Option<Job>, JobError> {
        let state = self.queue(queue);
        let inner = state.inner.lock().unwrap();
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn list_by_state(
        &self,
        queue: &str,
        states: &[JobState],
    ) -> Result<Vec<Job>, JobError> {
        let state = self.queue(queue);
        let inner = state.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| states.contains(&j.state))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn list_by_parent(&self, queue: &str, parent_id: &str) -> Result<Vec<Job>, JobError> {
        let state = self.queue(queue);
        let inner = state.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    fn observe(&self, queue: &str) -> broadcast::Receiver<QueueSignal> {
        self.queue(queue).signals.subscribe()
    }

    async fn counts(&self, queue: &str) -> Result<HashMap<JobState, usize>, JobError> {
        let state = self.queue(queue);
        let inner = state.inner.lock().unwrap();
        let mut counts = HashMap::new();
        for job in inner.jobs.values() {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::job::JobType;
    use crate::kernel::logsink::LogLevel;
    use tokio::time::timeout;

    fn new_job(id: &str) -> NewJob {
        NewJob {
            id: id.to_string(),
            tenant_id: "tenant-a".to_string(),
            job_type: JobType::Engagement,
            parent_id: None,
            payload: serde_json::json!({}),
        }
    }

    async fn must_claim(backend: &MemoryQueueBackend, queue: &str, worker: &str) -> ClaimedJob {
        timeout(
            Duration::from_secs(2),
            backend.claim(queue, worker, &CancellationToken::new()),
        )
        .await
        .expect("claim timed out")
        .unwrap()
        .expect("claim cancelled")
    }

    async fn nothing_ready(backend: &MemoryQueueBackend, queue: &str) {
        let result = timeout(
            Duration::from_millis(80),
            backend.claim(queue, "probe", &CancellationToken::new()),
        )
        .await;
        assert!(result.is_err(), "expected no claimable job");
    }

    #[tokio::test]
    async fn claims_follow_priority_then_fifo() {
        let backend = MemoryQueueBackend::new();
        for (id, priority) in [("low-1", 5), ("high", 0), ("low-2", 5)] {
            backend
                .enqueue(
                    "q",
                    new_job(id),
                    EnqueueOptions {
                        priority,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(must_claim(&backend, "q", "w").await.job.id, "high");
        assert_eq!(must_claim(&backend, "q", "w").await.job.id, "low-1");
        assert_eq!(must_claim(&backend, "q", "w").await.job.id, "low-2");
    }

    #[tokio::test]
    async fn claim_marks_active_and_counts_attempts() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue("q", new_job("j1"), EnqueueOptions::default())
            .await
            .unwrap();

        let claimed = must_claim(&backend, "q", "w").await;
        assert_eq!(claimed.job.state, JobState::Active);
        assert_eq!(claimed.job.attempts, 1);
        assert!(claimed.job.processed_at.is_some());
    }

    #[tokio::test]
    async fn delayed_jobs_wait_until_due() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue(
                "q",
                new_job("later"),
                EnqueueOptions {
                    delay_until: Some(Utc::now() + chrono::Duration::milliseconds(250)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        nothing_ready(&backend, "q").await;
        let claimed = must_claim(&backend, "q", "w").await;
        assert_eq!(claimed.job.id, "later");
    }

    #[tokio::test]
    async fn cancelled_claim_returns_none() {
        let backend = MemoryQueueBackend::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let claimed = backend.claim("q", "w", &cancel).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn complete_finalizes_the_job() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue("q", new_job("j1"), EnqueueOptions::default())
            .await
            .unwrap();
        let mut signals = backend.observe("q");

        let claimed = must_claim(&backend, "q", "w").await;
        backend
            .complete("j1", &claimed.worker_token, serde_json::json!({ "ok": true }))
            .await
            .unwrap();

        let job = backend.get_job("q", "j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());
        assert!(job.created_at <= job.processed_at.unwrap());
        assert!(job.processed_at.unwrap() <= job.finished_at.unwrap());

        match signals.recv().await.unwrap() {
            QueueSignal::Completed { job_id, result, .. } => {
                assert_eq!(job_id, "j1");
                assert_eq!(result["ok"], true);
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[tokio::test]
    async fn retryable_failure_requeues_until_attempts_exhausted() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue(
                "q",
                new_job("flaky"),
                EnqueueOptions {
                    attempts: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = must_claim(&backend, "q", "w").await;
        backend
            .fail(
                "flaky",
                &first.worker_token,
                "boom",
                true,
                Some(Duration::ZERO),
            )
            .await
            .unwrap();

        let second = must_claim(&backend, "q", "w").await;
        assert_eq!(second.job.attempts, 2);
        backend
            .fail(
                "flaky",
                &second.worker_token,
                "boom again",
                true,
                Some(Duration::ZERO),
            )
            .await
            .unwrap();

        let job = backend.get_job("q", "flaky").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("boom again"));
        nothing_ready(&backend, "q").await;
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal_immediately() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue("q", new_job("doomed"), EnqueueOptions::default())
            .await
            .unwrap();

        let claimed = must_claim(&backend, "q", "w").await;
        backend
            .fail("doomed", &claimed.worker_token, "bad password", false, None)
            .await
            .unwrap();

        let job = backend.get_job("q", "doomed").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        nothing_ready(&backend, "q").await;
    }

    #[tokio::test]
    async fn expired_lease_stalls_then_fails_permanently() {
        let backend = MemoryQueueBackend::with_lock_duration(Duration::from_millis(60));
        backend
            .enqueue("q", new_job("sticky"), EnqueueOptions::default())
            .await
            .unwrap();
        let mut signals = backend.observe("q");

        // First claim, never renewed.
        let _ = must_claim(&backend, "q", "w1").await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Recovery happens inside the next claim.
        let second = must_claim(&backend, "q", "w2").await;
        assert_eq!(second.job.id, "sticky");
        assert_eq!(second.job.stalled_count, 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        nothing_ready(&backend, "q").await;

        let job = backend.raw_job("sticky").unwrap();
        assert_eq!(job.state, JobState::Failed);

        let mut saw_stall = false;
        let mut saw_terminal_failure = false;
        while let Ok(signal) = signals.try_recv() {
            match signal {
                QueueSignal::Stalled { .. } => saw_stall = true,
                QueueSignal::Failed { will_retry, .. } if !will_retry => {
                    saw_terminal_failure = true
                }
                _ => {}
            }
        }
        assert!(saw_stall);
        assert!(saw_terminal_failure);
    }

    #[tokio::test]
    async fn renew_extends_and_rejects_stolen_leases() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue("q", new_job("j1"), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed = must_claim(&backend, "q", "w").await;

        backend.renew_lease("j1", &claimed.worker_token).await.unwrap();
        let err = backend.renew_lease("j1", "impostor").await.unwrap_err();
        assert!(matches!(err, JobError::Stalled));
    }

    #[tokio::test]
    async fn progress_signals_are_monotonic() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue("q", new_job("j1"), EnqueueOptions::default())
            .await
            .unwrap();
        let mut signals = backend.observe("q");
        let _claimed = must_claim(&backend, "q", "w").await;

        backend.update_progress("j1", 40).await.unwrap();
        backend.update_progress("j1", 20).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(QueueSignal::Progress { progress, .. }) = signals.try_recv() {
            seen.push(progress);
        }
        assert_eq!(seen, vec![40, 40]);
    }

    #[tokio::test]
    async fn logs_append_until_terminal() {
        let backend = MemoryQueueBackend::new();
        backend
            .enqueue("q", new_job("j1"), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed = must_claim(&backend, "q", "w").await;

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "while active".into(),
            source: "job".into(),
        };
        backend.append_log("j1", entry.clone()).await.unwrap();
        backend
            .complete("j1", &claimed.worker_token, serde_json::json!(null))
            .await
            .unwrap();
        backend
            .append_log(
                "j1",
                LogEntry {
                    message: "after terminal".into(),
                    ..entry
                },
            )
            .await
            .unwrap();

        let job = backend.get_job("q", "j1").await.unwrap().unwrap();
        assert_eq!(job.logs.len(), 1);
    }

    #[tokio::test]
    async fn retention_count_evicts_oldest_completed() {
        let backend = MemoryQueueBackend::new();
        let opts = EnqueueOptions {
            remove_on_complete_count: 1,
            ..Default::default()
        };
        for id in ["a", "b"] {
            backend.enqueue("q", new_job(id), opts.clone()).await.unwrap();
            let claimed = must_claim(&backend, "q", "w").await;
            backend
                .complete(id, &claimed.worker_token, serde_json::json!(null))
                .await
                .unwrap();
        }

        assert!(backend.get_job("q", "a").await.unwrap().is_none());
        assert!(backend.get_job("q", "b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn listing_by_parent_and_state() {
        let backend = MemoryQueueBackend::new();
        for id in ["p:1", "p:2"] {
            backend
                .enqueue(
                    "q",
                    NewJob {
                        parent_id: Some("p".into()),
                        ..new_job(id)
                    },
                    EnqueueOptions::default(),
                )
                .await
                .unwrap();
        }
        backend
            .enqueue("q", new_job("solo"), EnqueueOptions::default())
            .await
            .unwrap();

        let children = backend.list_by_parent("q", "p").await.unwrap();
        assert_eq!(children.len(), 2);

        let waiting = backend
            .list_by_state("q", &[JobState::Waiting])
            .await
            .unwrap();
        assert_eq!(waiting.len(), 3);

        let counts = backend.counts("q").await.unwrap();
        assert_eq!(counts.get(&JobState::Waiting), Some(&3));
    }
}
