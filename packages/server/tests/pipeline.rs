//! End-to-end pipeline tests: intake → queue → worker pool → dispatcher →
//! executors → event bus → fan-out, all on the in-process backend with a
//! scripted social client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;

use flock_core::domains;
use flock_core::kernel::accounts::MemoryAccountStore;
use flock_core::kernel::auth::AuthCoordinator;
use flock_core::kernel::clock::Rand;
use flock_core::kernel::events::{JobEvent, JobEventKind};
use flock_core::kernel::jobs::dispatcher::ExecutorDeps;
use flock_core::kernel::jobs::intake::IntakeOptions;
use flock_core::kernel::jobs::worker::WorkerPoolConfig;
use flock_core::kernel::jobs::{
    JobIntake, JobState, JobType, MemoryQueueBackend, QueueRegistry,
};
use flock_core::kernel::social::SocialError;
use flock_core::kernel::testing::{feed_of, MockClientFactory, MockSocialClient};
use flock_core::kernel::{EventBus, FanoutHub};

struct World {
    backend: Arc<MemoryQueueBackend>,
    accounts: Arc<MemoryAccountStore>,
    mock: Arc<MockSocialClient>,
    bus: EventBus,
    registry: Arc<QueueRegistry>,
    intake: JobIntake,
    fanout: FanoutHub,
}

fn world() -> World {
    let backend = Arc::new(MemoryQueueBackend::new());
    let accounts = Arc::new(MemoryAccountStore::new());
    let mock = Arc::new(MockSocialClient::new());
    mock.set_feed(feed_of(100));

    let bus = EventBus::new();
    let deps = Arc::new(ExecutorDeps {
        auth: Arc::new(AuthCoordinator::new(
            accounts.clone(),
            Arc::new(MockClientFactory::new(mock.clone())),
        )),
        rand: Arc::new(Rand::seeded(42)),
        http: reqwest::Client::new(),
    });
    let registry = Arc::new(QueueRegistry::new(
        backend.clone(),
        Arc::new(domains::build_dispatcher()),
        deps,
        bus.clone(),
        WorkerPoolConfig {
            concurrency: 2,
            ..Default::default()
        },
    ));
    let fanout = FanoutHub::new();
    FanoutHub::spawn(&bus, fanout.clone());

    World {
        intake: JobIntake::new(backend.clone(), registry.clone(), accounts.clone(), bus.clone()),
        backend,
        accounts,
        mock,
        bus,
        registry,
        fanout,
    }
}

fn engagement_payload(n: usize) -> Value {
    json!({
        "sessionData": {
            "handle": "bot.bsky.social",
            "refreshToken": "R1",
            "accessToken": "A1",
            "did": "did:plc:bot",
        },
        "engagementOptions": {
            "numberOfActions": n,
            "delayRange": [0, 0],
            "skipRange": [0, 0],
            "likePercentage": 70,
            "dryRun": true,
        },
        "strategyType": "uniform",
        "accountMetadata": { "accountId": "acct-e2e" },
    })
}

async fn wait_for(
    rx: &mut broadcast::Receiver<JobEvent>,
    kind: JobEventKind,
    job_id: &str,
) -> JobEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if event.kind == kind && event.job_id.as_deref() == Some(job_id) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind} of {job_id}"))
}

#[tokio::test]
async fn engagement_job_runs_end_to_end() {
    let w = world();
    let mut events = w.bus.subscribe();

    let job_id = w
        .intake
        .enqueue(
            "tenant-a",
            JobType::Engagement,
            engagement_payload(10),
            IntakeOptions::default(),
        )
        .await
        .unwrap();

    wait_for(&mut events, JobEventKind::Added, &job_id).await;
    wait_for(&mut events, JobEventKind::Started, &job_id).await;
    let completed = wait_for(&mut events, JobEventKind::Completed, &job_id).await;

    let report = completed.result.unwrap();
    assert_eq!(report["plannedActions"], 10);
    assert_eq!(report["successCount"], 10);
    assert_eq!(report["errorCount"], 0);
    assert_eq!(report["likeCount"], 7);
    assert_eq!(report["repostCount"], 3);

    // Dry run: nothing hit the upstream.
    assert!(w.mock.likes().is_empty());
    assert!(w.mock.reposts().is_empty());

    // The refresh rotated tokens and pushed them to the account store.
    let updates = w.accounts.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "acct-e2e");
    assert_eq!(updates[0].1.access_token, "access");
    assert_eq!(updates[0].1.refresh_token, "refresh");

    let projection = w
        .intake
        .get_job("tenant-a", JobType::Engagement, &job_id)
        .await
        .unwrap();
    assert_eq!(projection.state, JobState::Completed);
    assert_eq!(projection.progress, 100);
    assert_eq!(projection.attempts, 1);
    assert!(projection.finished_at.is_some());
    assert!(!projection.logs.is_empty());
}

#[tokio::test]
async fn progress_ticks_monotonically_to_100() {
    let w = world();
    let mut events = w.bus.subscribe();

    let job_id = w
        .intake
        .enqueue(
            "tenant-b",
            JobType::Engagement,
            engagement_payload(5),
            IntakeOptions::default(),
        )
        .await
        .unwrap();

    // Record every progress tick until the job completes.
    let mut last = 0u8;
    let mut ticks = 0usize;
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if event.job_id.as_deref() != Some(job_id.as_str()) {
                continue;
            }
            match event.kind {
                JobEventKind::Progress => {
                    let progress = event.progress.unwrap();
                    assert!(progress >= last, "progress went backwards: {last} -> {progress}");
                    last = progress;
                    ticks += 1;
                }
                JobEventKind::Completed => break,
                _ => {}
            }
        }
    })
    .await
    .expect("job did not complete in time");

    assert!(ticks >= 5, "expected a tick per planned action, got {ticks}");
    let cached = w.fanout.cached(&job_id).expect("cached state");
    assert_eq!(cached.progress, 100);
    assert_eq!(cached.state, JobState::Completed);
}

#[tokio::test]
async fn subscriber_only_sees_watched_job_telemetry() {
    let w = world();
    let mut events = w.bus.subscribe();

    // A short enqueue delay leaves room to attach the subscriber before
    // either job starts producing telemetry.
    let delayed = IntakeOptions {
        delay_seconds: Some(1),
        ..Default::default()
    };
    let j1 = w
        .intake
        .enqueue(
            "tenant-iso",
            JobType::Engagement,
            engagement_payload(4),
            delayed.clone(),
        )
        .await
        .unwrap();
    let j2 = w
        .intake
        .enqueue(
            "tenant-iso",
            JobType::Engagement,
            engagement_payload(4),
            delayed,
        )
        .await
        .unwrap();

    let (_id, mut rx) = w
        .fanout
        .subscribe("tenant-iso", vec![j1.clone()], Vec::new());

    wait_for(&mut events, JobEventKind::Completed, &j1).await;
    wait_for(&mut events, JobEventKind::Completed, &j2).await;

    let mut saw_j1_progress = false;
    let mut saw_j2_progress = false;
    let mut saw_j2_lifecycle = false;
    while let Ok(event) = rx.try_recv() {
        match (event.kind, event.job_id.as_deref()) {
            (JobEventKind::Progress, Some(id)) if id == j1 => saw_j1_progress = true,
            (JobEventKind::Progress, Some(id)) if id == j2 => saw_j2_progress = true,
            (kind, Some(id)) if id == j2 && kind != JobEventKind::Log => {
                saw_j2_lifecycle = true
            }
            _ => {}
        }
    }

    assert!(saw_j1_progress, "watched job telemetry must arrive");
    assert!(!saw_j2_progress, "unwatched telemetry must not leak");
    assert!(saw_j2_lifecycle, "user-room lifecycle summaries still arrive");
}

#[tokio::test]
async fn auth_exhausted_fails_terminally_without_retry() {
    let w = world();
    let mut events = w.bus.subscribe();

    // All three methods fail; no password on file.
    w.mock
        .script_refresh(Err(SocialError::Auth("refresh dead".into())));
    w.mock
        .script_resume(Err(SocialError::Auth("resume dead".into())));

    let payload = json!({
        "sessionData": {
            "handle": "bot.bsky.social",
            "refreshToken": "R1",
            "did": "did:plc:bot",
        },
    });
    let job_id = w
        .intake
        .enqueue(
            "tenant-auth",
            JobType::Engagement,
            payload,
            IntakeOptions::default(),
        )
        .await
        .unwrap();

    let failed = wait_for(&mut events, JobEventKind::Failed, &job_id).await;
    assert_eq!(failed.will_retry, Some(false));
    assert!(failed.error.unwrap().contains("authentication exhausted"));

    let job = w.backend.raw_job(&job_id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1, "a bad credential must not burn retries");
}

#[tokio::test]
async fn transient_upstream_failure_schedules_a_retry() {
    let w = world();
    w.mock.set_feed(Vec::new()); // empty feed => Upstream error
    let mut events = w.bus.subscribe();

    let job_id = w
        .intake
        .enqueue(
            "tenant-retry",
            JobType::Engagement,
            engagement_payload(3),
            IntakeOptions::default(),
        )
        .await
        .unwrap();

    let failed = wait_for(&mut events, JobEventKind::Failed, &job_id).await;
    assert_eq!(failed.will_retry, Some(true));

    let job = w.backend.raw_job(&job_id).unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn mass_post_pipeline_pins_once() {
    let w = world();
    let mut events = w.bus.subscribe();

    let payload = json!({
        "sessionData": {
            "handle": "bot.bsky.social",
            "refreshToken": "R1",
            "did": "did:plc:bot",
        },
        "postOptions": {
            "posts": [
                { "text": "a" },
                { "text": "b", "pin": true },
                { "text": "c", "pin": true },
            ],
            "delayRange": [0, 0],
        },
    });
    let job_id = w
        .intake
        .enqueue("tenant-posts", JobType::MassPost, payload, IntakeOptions::default())
        .await
        .unwrap();

    let completed = wait_for(&mut events, JobEventKind::Completed, &job_id).await;
    let report = completed.result.unwrap();
    assert_eq!(report["successCount"], 3);
    assert_eq!(report["stats"]["pinnedPost"], true);
    assert_eq!(w.mock.pins().len(), 1);
}

#[tokio::test]
async fn chat_pipeline_reports_per_recipient() {
    let w = world();
    let mut events = w.bus.subscribe();

    let payload = json!({
        "sessionData": {
            "handle": "bot.bsky.social",
            "refreshToken": "R1",
            "did": "did:plc:bot",
        },
        "messages": "hello there",
        "recipients": ["x.bsky.social", "y.bsky.social"],
    });
    let job_id = w
        .intake
        .enqueue("tenant-chat", JobType::Chat, payload, IntakeOptions::default())
        .await
        .unwrap();

    let completed = wait_for(&mut events, JobEventKind::Completed, &job_id).await;
    let report = completed.result.unwrap();
    assert_eq!(report["successCount"], 2);
    assert_eq!(w.mock.dms().len(), 2);
}

#[tokio::test]
async fn bulk_children_complete_under_one_parent() {
    let w = world();
    let mut events = w.bus.subscribe();

    let receipt = w
        .intake
        .enqueue_bulk(
            "tenant-bulk",
            JobType::Engagement,
            vec![engagement_payload(2), engagement_payload(2)],
            IntakeOptions::default(),
        )
        .await
        .unwrap();

    for job_id in &receipt.job_ids {
        let event = wait_for(&mut events, JobEventKind::Completed, job_id).await;
        assert_eq!(event.parent_id.as_deref(), Some(receipt.parent_id.as_str()));
    }

    let children = w
        .intake
        .list_by_parent("tenant-bulk", JobType::Engagement, &receipt.parent_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.state == JobState::Completed));

    // Queue bookkeeping: the registry knows this tenant's queue.
    assert!(w
        .registry
        .queue_names()
        .iter()
        .any(|(name, tenant, _)| tenant == "tenant-bulk" && name.contains("engagement")));
}
