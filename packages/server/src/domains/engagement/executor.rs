//! Walks a pacing plan against a fetched feed, one action per step.
//!
//! Per-action failures are recorded in the report and do not fail the job
//! unless `stopOnError` is set; cancellation and auth exhaustion do. Sleeps
//! are cancellable so a revoked lease is observed at the next suspension
//! point.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::common::errors::JobError;
use crate::common::types::{EngagementOptions, EngagementPayload};
use crate::kernel::jobs::dispatcher::JobContext;
use crate::kernel::logsink::JobLogger;
use crate::kernel::social::{FeedEntry, SocialClient};

use super::planner::{self, ActionType, EngagementPlan};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub action: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementReport {
    pub results: Vec<ActionOutcome>,
    pub planned_actions: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub like_count: usize,
    pub repost_count: usize,
}

/// Executor entry point registered with the dispatcher.
pub async fn run(payload: EngagementPayload, ctx: JobContext) -> Result<Value, JobError> {
    let mut session = payload.session_data;
    let client = ctx
        .deps
        .auth
        .authenticate(&mut session, &payload.account_metadata, &ctx.logger)
        .await
        .map_err(|e| JobError::AuthExhausted(e.to_string()))?;

    let options = payload.engagement_options;
    let mut plan = planner::build_plan(&options, payload.strategy_type, &ctx.deps.rand);
    ctx.logger.info(format!(
        "planned {} actions ({} likes, {} reposts), ~{}s total",
        plan.actions.len(),
        plan.like_count,
        plan.repost_count,
        plan.total_time
    ));

    let limit = (options.number_of_actions * 2).max(50) as u32;
    let feed = match &options.feed_uri {
        Some(uri) => client.get_feed(uri, limit).await?,
        None => client.get_timeline(limit).await?,
    };
    if feed.is_empty() {
        return Err(JobError::Upstream("feed returned no posts".into()));
    }
    ctx.logger.debug(format!("fetched {} feed posts", feed.len()));

    let report = walk_plan(
        client,
        &mut plan,
        &feed,
        &options,
        &ctx.logger,
        &ctx.cancel,
        Some(&ctx.progress),
    )
    .await?;

    serde_json::to_value(&report).map_err(|e| JobError::Internal(e.to_string()))
}

/// Walk the plan. Exposed separately so tests can drive a pre-built plan and
/// feed without the auth and fetch preamble.
pub async fn walk_plan(
    client: Arc<dyn SocialClient>,
    plan: &mut EngagementPlan,
    feed: &[FeedEntry],
    options: &EngagementOptions,
    logger: &JobLogger,
    cancel: &CancellationToken,
    progress: Option<&crate::kernel::jobs::dispatcher::ProgressReporter>,
) -> Result<EngagementReport, JobError> {
    let total = plan.actions.len();
    let mut results = Vec::with_capacity(total);
    let mut cursor = 0usize;

    for i in 0..total {
        let action = &plan.actions[i];
        pause(cancel, action.delay_s).await?;

        cursor += action.skip;
        if cursor >= feed.len() {
            logger.warn(format!(
                "skip moved past the end of the feed ({cursor} >= {}), clamping",
                feed.len()
            ));
            cursor = feed.len() - 1;
        }

        let outcome = match &feed[cursor].post {
            None => {
                logger.warn(format!("feed item at {cursor} has no post reference, skipping"));
                ActionOutcome {
                    success: false,
                    action: action.action,
                    post_uri: None,
                    post_cid: None,
                    error: Some("malformed feed item".into()),
                }
            }
            Some(post) => {
                let text = post.text();
                let preview: String = text.chars().take(48).collect();
                if options.dry_run {
                    logger.info(format!(
                        "[dry-run] would {} post by @{}: {preview}",
                        verb(action.action),
                        post.author_handle
                    ));
                    success_outcome(action.action, post.uri.clone(), post.cid.clone())
                } else {
                    let attempt = match action.action {
                        ActionType::Like => client.like(&post.uri, &post.cid).await,
                        ActionType::Repost => client.repost(&post.uri, &post.cid).await,
                    };
                    match attempt {
                        Ok(()) => {
                            logger.debug(format!(
                                "{} post by @{}",
                                verb(action.action),
                                post.author_handle
                            ));
                            success_outcome(action.action, post.uri.clone(), post.cid.clone())
                        }
                        Err(e) => {
                            logger.warn(format!("{} failed: {e}", verb(action.action)));
                            ActionOutcome {
                                success: false,
                                action: action.action,
                                post_uri: Some(post.uri.clone()),
                                post_cid: Some(post.cid.clone()),
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }
            }
        };

        let succeeded = outcome.success;
        if succeeded {
            cursor += 1;
            plan.actions[i].executed = true;
        }
        results.push(outcome);

        if let Some(progress) = progress {
            progress.set(((i + 1) * 100 / total) as u8).await;
        }

        if !succeeded && options.stop_on_error {
            logger.warn("stopping on first error as requested");
            break;
        }
    }

    let success_count = results.iter().filter(|r| r.success).count();
    let like_count = results
        .iter()
        .filter(|r| r.success && r.action == ActionType::Like)
        .count();
    Ok(EngagementReport {
        planned_actions: total,
        success_count,
        error_count: results.len() - success_count,
        like_count,
        repost_count: success_count - like_count,
        results,
    })
}

fn success_outcome(action: ActionType, uri: String, cid: String) -> ActionOutcome {
    ActionOutcome {
        success: true,
        action,
        post_uri: Some(uri),
        post_cid: Some(cid),
        error: None,
    }
}

fn verb(action: ActionType) -> &'static str {
    match action {
        ActionType::Like => "like",
        ActionType::Repost => "repost",
    }
}

/// Cancellable sleep; a revoked lease surfaces as [`JobError::Cancelled`].
async fn pause(cancel: &CancellationToken, seconds: u64) -> Result<(), JobError> {
    if seconds == 0 {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::StrategyType;
    use crate::kernel::clock::Rand;
    use crate::kernel::event_bus::EventBus;
    use crate::kernel::jobs::job::JobType;
    use crate::kernel::jobs::memory::MemoryQueueBackend;
    use crate::kernel::logsink::{JobLogMeta, JobLogger};
    use crate::kernel::testing::{feed_of, feed_with_gaps, MockSocialClient};

    fn logger() -> (JobLogger, tokio::task::JoinHandle<()>) {
        JobLogger::channel(
            JobLogMeta {
                job_id: "job-1".into(),
                tenant_id: "t".into(),
                parent_id: None,
                job_type: JobType::Engagement,
            },
            std::sync::Arc::new(MemoryQueueBackend::new()),
            EventBus::new(),
        )
    }

    fn zero_delay_options(n: usize, like_pct: u8) -> EngagementOptions {
        EngagementOptions {
            number_of_actions: n,
            delay_range: [0, 0],
            skip_range: [0, 0],
            like_percentage: like_pct,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dry_run_performs_no_upstream_mutations() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        let mut options = zero_delay_options(10, 70);
        options.dry_run = true;
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(42));
        let (logger, _drain) = logger();

        let report = walk_plan(
            client.clone(),
            &mut plan,
            &feed_of(100),
            &options,
            &logger,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.results.len(), 10);
        assert_eq!(report.success_count, 10);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.like_count, 7);
        assert_eq!(report.repost_count, 3);
        assert!(client.likes().is_empty());
        assert!(client.reposts().is_empty());
        assert!(plan.actions.iter().all(|a| a.executed));
    }

    #[tokio::test]
    async fn live_run_performs_the_planned_mix() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        let options = zero_delay_options(10, 70);
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(42));
        let (logger, _drain) = logger();

        let report = walk_plan(
            client.clone(),
            &mut plan,
            &feed_of(100),
            &options,
            &logger,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.success_count, 10);
        assert_eq!(client.likes().len(), 7);
        assert_eq!(client.reposts().len(), 3);
        // successCount + errorCount always covers the whole plan
        assert_eq!(
            report.success_count + report.error_count,
            report.planned_actions
        );
    }

    #[tokio::test]
    async fn malformed_feed_items_are_recorded_and_skipped() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        let options = zero_delay_options(3, 100);
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(1));
        let (logger, _drain) = logger();

        // Cursor stays on the malformed slot (no advance on failure), so with
        // zero skips the first action fails and the rest keep hitting it.
        let feed = feed_with_gaps(5, &[0]);
        let report = walk_plan(
            client.clone(),
            &mut plan,
            &feed,
            &options,
            &logger,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.error_count, 3);
        assert!(report.results.iter().all(|r| !r.success));
        assert!(client.likes().is_empty());
    }

    #[tokio::test]
    async fn cursor_clamps_at_feed_end() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        let mut options = zero_delay_options(4, 100);
        options.skip_range = [10, 10];
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(1));
        let (logger, _drain) = logger();

        let report = walk_plan(
            client.clone(),
            &mut plan,
            &feed_of(3),
            &options,
            &logger,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        // Every action clamps to the final post and succeeds there.
        assert_eq!(report.success_count, 4);
        assert!(client
            .likes()
            .iter()
            .all(|(uri, _)| uri.ends_with("/2")));
    }

    #[tokio::test]
    async fn stop_on_error_halts_the_walk() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        client.fail_actions_on("at://did:plc:feed/app.bsky.feed.post/0");
        let mut options = zero_delay_options(5, 100);
        options.stop_on_error = true;
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(1));
        let (logger, _drain) = logger();

        let report = walk_plan(
            client.clone(),
            &mut plan,
            &feed_of(10),
            &options,
            &logger,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].success);
        assert_eq!(report.error_count, 1);
    }

    #[tokio::test]
    async fn errors_continue_without_stop_on_error() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        client.fail_actions_on("at://did:plc:feed/app.bsky.feed.post/0");
        let options = zero_delay_options(3, 100);
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(1));
        let (logger, _drain) = logger();

        let report = walk_plan(
            client.clone(),
            &mut plan,
            &feed_of(10),
            &options,
            &logger,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        // First action fails on post 0 and the cursor stays put; later
        // actions keep failing on the same post.
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.success_count + report.error_count, 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let client = std::sync::Arc::new(MockSocialClient::new());
        let mut options = zero_delay_options(2, 100);
        options.delay_range = [30, 30];
        let mut plan = planner::build_plan(&options, StrategyType::Uniform, &Rand::seeded(1));
        let (logger, _drain) = logger();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = walk_plan(
            client,
            &mut plan,
            &feed_of(10),
            &options,
            &logger,
            &cancel,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
    }
}
