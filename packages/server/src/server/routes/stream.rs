//! Live event streaming over SSE, plus the monitor/unmonitor mutations.
//!
//! A subscriber connects with optional `jobs=`/`groups=` initial watches,
//! receives a `subscribed` event carrying its subscriber id, then the live
//! tail. Watch-set mutations go through the REST endpoints keyed by that id.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

use crate::common::errors::JobError;
use crate::server::app::AppState;

use super::{tenant_from, ApiError};

/// Pool concurrency for queues bootstrapped by a live connection.
const LIVE_CONCURRENCY: usize = 5;

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Comma-separated job ids to watch from the start.
    #[serde(default)]
    pub jobs: Option<String>,
    /// Comma-separated group (parent) ids to watch from the start.
    #[serde(default)]
    pub groups: Option<String>,
}

fn split_csv(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub async fn events(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = tenant_from(&headers)?;

    // A live observer implies live workloads; pre-create the tenant's fleet.
    state
        .registry
        .bootstrap_tenant(&tenant, LIVE_CONCURRENCY)
        .await;

    let (subscriber_id, rx) =
        state
            .fanout
            .subscribe(&tenant, split_csv(&params.jobs), split_csv(&params.groups));

    let hello = Event::default().event("subscribed").data(
        json!({ "subscriberId": subscriber_id, "tenantId": tenant }).to_string(),
    );

    let live = ReceiverStream::new(rx).map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.kind.as_str())
                .data(serde_json::to_string(&event).unwrap_or_else(|_| "{}".into())),
        )
    });
    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(stream::once(async move { Ok::<_, Infallible>(hello) }).chain(live));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchBody {
    pub job_id: Option<String>,
    pub parent_id: Option<String>,
}

pub async fn monitor(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Json(body): Json<WatchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ok = match (&body.job_id, &body.parent_id) {
        (Some(job_id), _) => state.fanout.monitor_job(&subscriber_id, job_id),
        (None, Some(parent_id)) => state.fanout.monitor_group(&subscriber_id, parent_id),
        (None, None) => {
            return Err(ApiError(JobError::BadRequest(
                "jobId or parentId required".into(),
            )))
        }
    };
    if !ok {
        return Err(ApiError(JobError::NotFound(format!(
            "subscriber {subscriber_id}"
        ))));
    }
    Ok(Json(json!({ "ok": true })))
}

pub async fn unmonitor(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Json(body): Json<WatchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match (&body.job_id, &body.parent_id) {
        (Some(job_id), _) => state.fanout.unmonitor_job(&subscriber_id, job_id),
        (None, Some(parent_id)) => state.fanout.unmonitor_group(&subscriber_id, parent_id),
        (None, None) => {
            return Err(ApiError(JobError::BadRequest(
                "jobId or parentId required".into(),
            )))
        }
    };
    Ok(Json(json!({ "ok": true })))
}
