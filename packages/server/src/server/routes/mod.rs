pub mod admin;
pub mod health;
pub mod jobs;
pub mod stream;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::common::errors::JobError;
use crate::kernel::jobs::JobType;

/// Wire mapping of the error taxonomy.
pub struct ApiError(pub JobError);

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            JobError::BadRequest(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            JobError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// API callers identify their tenant with this header; authenticating them
/// is an edge concern outside the core.
pub const TENANT_HEADER: &str = "x-tenant-id";

pub fn tenant_from(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError(JobError::BadRequest(format!("missing {TENANT_HEADER} header"))))
}

pub fn parse_job_type(raw: &str) -> Result<JobType, ApiError> {
    raw.parse::<JobType>()
        .map_err(|e| ApiError(JobError::BadRequest(e)))
}
