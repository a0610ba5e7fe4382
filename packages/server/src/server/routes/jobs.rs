//! Intake routes: enqueue single, bulk and per-category jobs; query job
//! projections.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::kernel::jobs::intake::IntakeOptions;
use crate::server::app::AppState;

use super::{parse_job_type, tenant_from, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueBody {
    pub payload: Value,
    #[serde(default)]
    pub opts: IntakeOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkBody {
    pub payloads: Vec<Value>,
    #[serde(default)]
    pub opts: IntakeOptions,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryBody {
    pub payload: Value,
    pub opts: IntakeOptions,
}

pub async fn enqueue(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    headers: HeaderMap,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant_from(&headers)?;
    let job_type = parse_job_type(&job_type)?;
    let job_id = state
        .intake
        .enqueue(&tenant, job_type, body.payload, body.opts)
        .await?;
    Ok(Json(json!({ "jobId": job_id })))
}

pub async fn enqueue_bulk(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    headers: HeaderMap,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant_from(&headers)?;
    let job_type = parse_job_type(&job_type)?;
    let receipt = state
        .intake
        .enqueue_bulk(&tenant, job_type, body.payloads, body.opts)
        .await?;
    Ok(Json(json!({
        "parentId": receipt.parent_id,
        "jobIds": receipt.job_ids,
    })))
}

pub async fn enqueue_by_category(
    State(state): State<AppState>,
    Path((job_type, category_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<CategoryBody>,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant_from(&headers)?;
    let job_type = parse_job_type(&job_type)?;
    let receipt = state
        .intake
        .enqueue_by_category(&tenant, job_type, &category_id, body.payload, body.opts)
        .await?;
    Ok(Json(json!({
        "parentId": receipt.parent_id,
        "jobIds": receipt.job_ids,
        "accountCount": receipt.account_count,
    })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path((job_type, job_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant_from(&headers)?;
    let job_type = parse_job_type(&job_type)?;
    let projection = state.intake.get_job(&tenant, job_type, &job_id).await?;
    Ok(Json(serde_json::to_value(projection).unwrap_or(Value::Null)))
}

pub async fn list_group(
    State(state): State<AppState>,
    Path((job_type, parent_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let tenant = tenant_from(&headers)?;
    let job_type = parse_job_type(&job_type)?;
    let projections = state
        .intake
        .list_by_parent(&tenant, job_type, &parent_id)
        .await?;
    Ok(Json(serde_json::to_value(projections).unwrap_or(Value::Null)))
}
