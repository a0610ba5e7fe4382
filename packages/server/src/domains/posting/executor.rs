//! Sequentially publishes a batch of posts.
//!
//! Item-level failures (bad image, upstream error, lapsed session that will
//! not recover) are recorded in the result and the batch moves on. At most
//! one post per batch is pinned to the profile, the first successful item
//! flagged `pin`.

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::common::errors::JobError;
use crate::common::types::MassPostPayload;
use crate::kernel::jobs::dispatcher::JobContext;
use crate::kernel::social::ImageEmbed;

use super::image;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MassPostReport {
    pub results: Vec<PostOutcome>,
    pub success_count: usize,
    pub error_count: usize,
    pub stats: MassPostStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MassPostStats {
    pub pinned_post: bool,
}

pub async fn run(payload: MassPostPayload, ctx: JobContext) -> Result<Value, JobError> {
    let mut session = payload.session_data;
    let meta = payload.account_metadata;
    let mut client = ctx
        .deps
        .auth
        .authenticate(&mut session, &meta, &ctx.logger)
        .await
        .map_err(|e| JobError::AuthExhausted(e.to_string()))?;

    let mut posts = payload.post_options.posts;
    if payload.post_options.reverse_order {
        posts.reverse();
    }
    let [delay_min, delay_max] = payload.post_options.delay_range;
    let total = posts.len();

    let mut results = Vec::with_capacity(total);
    let mut pinned_done = false;

    for (i, item) in posts.iter().enumerate() {
        // The session may lapse mid-batch; one fresh coordination per item.
        if !client.has_session() {
            ctx.logger.warn("session lapsed mid-batch, re-authenticating");
            match ctx.deps.auth.authenticate(&mut session, &meta, &ctx.logger).await {
                Ok(fresh) => client = fresh,
                Err(e) => {
                    results.push(PostOutcome {
                        success: false,
                        uri: None,
                        cid: None,
                        pinned: false,
                        error: Some(e.to_string()),
                    });
                    ctx.progress.set(((i + 1) * 100 / total) as u8).await;
                    continue;
                }
            }
        }

        let mut text = item.text.clone();
        if item.include_timestamp {
            let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            text.push_str(&format!("\n\n[{stamp}]"));
        }

        let outcome = publish_one(&ctx, &client, item, &text, item.pin && !pinned_done).await;
        match outcome {
            Ok((uri, cid, pinned)) => {
                if pinned {
                    pinned_done = true;
                    ctx.logger.info(format!("pinned post {uri} to profile"));
                }
                ctx.logger.debug(format!("published post {}/{total}", i + 1));
                results.push(PostOutcome {
                    success: true,
                    uri: Some(uri),
                    cid: Some(cid),
                    pinned,
                    error: None,
                });
            }
            Err(e) => {
                ctx.logger.warn(format!("post {}/{total} failed: {e}", i + 1));
                results.push(PostOutcome {
                    success: false,
                    uri: None,
                    cid: None,
                    pinned: false,
                    error: Some(e.to_string()),
                });
            }
        }

        ctx.progress.set(((i + 1) * 100 / total) as u8).await;

        if i + 1 < total {
            let delay = ctx.deps.rand.u64_in(delay_min..=delay_max);
            pause(&ctx.cancel, delay).await?;
        }
    }

    let success_count = results.iter().filter(|r| r.success).count();
    let report = MassPostReport {
        error_count: results.len() - success_count,
        success_count,
        stats: MassPostStats {
            pinned_post: pinned_done,
        },
        results,
    };
    serde_json::to_value(&report).map_err(|e| JobError::Internal(e.to_string()))
}

/// Publish one item: resolve/upload the image if any, create the post, pin
/// when asked. Any error is an item-level failure.
async fn publish_one(
    ctx: &JobContext,
    client: &std::sync::Arc<dyn crate::kernel::social::SocialClient>,
    item: &crate::common::types::PostItem,
    text: &str,
    pin: bool,
) -> Result<(String, String, bool), JobError> {
    let embed = match &item.image_url {
        None => None,
        Some(url) => {
            let (bytes, mime) = image::resolve(&ctx.deps.http, url).await?;
            let original = bytes.len();
            let (bytes, mime) = image::fit_to_cap(bytes, &mime)?;
            if bytes.len() < original {
                ctx.logger.info(format!(
                    "downscaled image from {original} to {} bytes",
                    bytes.len()
                ));
            }
            let blob = client.upload_blob(bytes, &mime).await?;
            Some(ImageEmbed {
                blob,
                alt: item.alt.clone().unwrap_or_default(),
            })
        }
    };

    let post = client.create_post(text, embed).await?;
    let mut pinned = false;
    if pin {
        client.set_pinned_post(&post).await?;
        pinned = true;
    }
    Ok((post.uri, post.cid, pinned))
}

async fn pause(cancel: &CancellationToken, seconds: u64) -> Result<(), JobError> {
    if seconds == 0 {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => Ok(()),
    }
}
