//! Pairs messages with recipients round-robin, opening one conversation per
//! recipient. Progress advances one step per recipient; per-recipient
//! failures are item-level.

use serde::Serialize;
use serde_json::Value;

use crate::common::errors::JobError;
use crate::common::types::ChatPayload;
use crate::kernel::jobs::dispatcher::JobContext;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DmOutcome {
    pub success: bool,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReport {
    pub results: Vec<DmOutcome>,
    pub success_count: usize,
    pub error_count: usize,
}

pub async fn run(payload: ChatPayload, ctx: JobContext) -> Result<Value, JobError> {
    let mut session = payload.session_data;
    let client = ctx
        .deps
        .auth
        .authenticate(&mut session, &payload.account_metadata, &ctx.logger)
        .await
        .map_err(|e| JobError::AuthExhausted(e.to_string()))?;

    let messages = payload.messages.as_vec();
    let total = payload.recipients.len();
    let mut results = Vec::with_capacity(total);

    for (i, recipient) in payload.recipients.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let message = messages[i % messages.len()];

        let outcome = async {
            let convo_id = client.start_conversation(recipient).await?;
            client.send_dm(&convo_id, message).await?;
            Ok::<String, JobError>(convo_id)
        }
        .await;

        match outcome {
            Ok(convo_id) => {
                ctx.logger
                    .debug(format!("sent dm to @{recipient} ({}/{total})", i + 1));
                results.push(DmOutcome {
                    success: true,
                    recipient: recipient.clone(),
                    convo_id: Some(convo_id),
                    error: None,
                });
            }
            Err(e) => {
                ctx.logger.warn(format!("dm to @{recipient} failed: {e}"));
                results.push(DmOutcome {
                    success: false,
                    recipient: recipient.clone(),
                    convo_id: None,
                    error: Some(e.to_string()),
                });
            }
        }

        ctx.progress.set(((i + 1) * 100 / total) as u8).await;
    }

    let success_count = results.iter().filter(|r| r.success).count();
    let report = ChatReport {
        error_count: results.len() - success_count,
        success_count,
        results,
    };
    serde_json::to_value(&report).map_err(|e| JobError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Messages, SessionData};
    use crate::kernel::accounts::MemoryAccountStore;
    use crate::kernel::auth::AuthCoordinator;
    use crate::kernel::clock::Rand;
    use crate::kernel::event_bus::EventBus;
    use crate::kernel::jobs::dispatcher::{ExecutorDeps, JobContext, ProgressReporter};
    use crate::kernel::jobs::job::JobType;
    use crate::kernel::jobs::memory::MemoryQueueBackend;
    use crate::kernel::logsink::{JobLogMeta, JobLogger};
    use crate::kernel::testing::{MockClientFactory, MockSocialClient};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx_with(mock: Arc<MockSocialClient>) -> (JobContext, tokio::task::JoinHandle<()>) {
        let backend = Arc::new(MemoryQueueBackend::new());
        let (logger, drain) = JobLogger::channel(
            JobLogMeta {
                job_id: "job-1".into(),
                tenant_id: "t".into(),
                parent_id: None,
                job_type: JobType::Chat,
            },
            backend.clone(),
            EventBus::new(),
        );
        let ctx = JobContext {
            job_id: "job-1".into(),
            tenant_id: "t".into(),
            parent_id: None,
            job_type: JobType::Chat,
            attempt: 1,
            logger,
            progress: ProgressReporter::new(backend, "job-1".into()),
            cancel: CancellationToken::new(),
            deps: Arc::new(ExecutorDeps {
                auth: Arc::new(AuthCoordinator::new(
                    Arc::new(MemoryAccountStore::new()),
                    Arc::new(MockClientFactory::new(mock)),
                )),
                rand: Arc::new(Rand::seeded(9)),
                http: reqwest::Client::new(),
            }),
        };
        (ctx, drain)
    }

    fn payload(messages: Messages, recipients: Vec<&str>) -> ChatPayload {
        ChatPayload {
            session_data: SessionData {
                did: Some("did:plc:mock".into()),
                handle: "bot.bsky.social".into(),
                email: None,
                access_token: "A".into(),
                refresh_token: "R".into(),
            },
            messages,
            recipients: recipients.into_iter().map(String::from).collect(),
            account_metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn single_message_fans_out_to_all_recipients() {
        let mock = Arc::new(MockSocialClient::new());
        let (ctx, _drain) = ctx_with(mock.clone());

        let result = run(
            payload(Messages::One("hello".into()), vec!["a.bsky.social", "b.bsky.social"]),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(result["successCount"], 2);
        let dms = mock.dms();
        assert_eq!(dms.len(), 2);
        assert!(dms.iter().all(|(_, text)| text == "hello"));
        assert_eq!(
            mock.conversations_started(),
            vec!["a.bsky.social", "b.bsky.social"]
        );
    }

    #[tokio::test]
    async fn messages_rotate_round_robin() {
        let mock = Arc::new(MockSocialClient::new());
        let (ctx, _drain) = ctx_with(mock.clone());

        run(
            payload(
                Messages::Many(vec!["one".into(), "two".into()]),
                vec!["a.bsky.social", "b.bsky.social", "c.bsky.social"],
            ),
            ctx,
        )
        .await
        .unwrap();

        let texts: Vec<String> = mock.dms().into_iter().map(|(_, text)| text).collect();
        assert_eq!(texts, vec!["one", "two", "one"]);
    }

    #[tokio::test]
    async fn failed_recipient_is_item_level() {
        let mock = Arc::new(MockSocialClient::new());
        mock.fail_conversations_with("blocked.bsky.social");
        let (ctx, _drain) = ctx_with(mock.clone());

        let result = run(
            payload(
                Messages::One("hi".into()),
                vec!["a.bsky.social", "blocked.bsky.social", "c.bsky.social"],
            ),
            ctx,
        )
        .await
        .unwrap();

        assert_eq!(result["successCount"], 2);
        assert_eq!(result["errorCount"], 1);
        let results = result["results"].as_array().unwrap();
        assert_eq!(results[1]["success"], false);
        assert_eq!(results[1]["recipient"], "blocked.bsky.social");
        assert_eq!(mock.dms().len(), 2);
    }
}
