//! Queue-admin surface. In production with an admin key configured, every
//! request must present the key.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::kernel::jobs::JobState;
use crate::server::app::AppState;

use super::ApiError;

const ADMIN_HEADER: &str = "x-admin-key";

pub async fn queues(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if state.config.admin_key_required() {
        let presented = headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
        if presented != state.config.admin_key.as_deref() {
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "admin key required" })),
            )
                .into_response());
        }
    }

    let mut rows = Vec::new();
    for (queue, tenant, job_type) in state.registry.queue_names() {
        let counts = state.backend.counts(&queue).await?;
        let count_of = |s: JobState| counts.get(&s).copied().unwrap_or(0);
        rows.push(json!({
            "queue": queue,
            "tenantId": tenant,
            "jobType": job_type,
            "counts": {
                "waiting": count_of(JobState::Waiting),
                "active": count_of(JobState::Active),
                "completed": count_of(JobState::Completed),
                "failed": count_of(JobState::Failed),
                "stalled": count_of(JobState::Stalled),
            },
        }));
    }
    Ok(Json(json!({ "queues": rows })).into_response())
}
