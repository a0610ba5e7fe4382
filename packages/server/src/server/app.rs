use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::kernel::jobs::{JobIntake, QueueBackend, QueueRegistry};
use crate::kernel::FanoutHub;

use super::routes;

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<JobIntake>,
    pub registry: Arc<QueueRegistry>,
    pub backend: Arc<dyn QueueBackend>,
    pub fanout: FanoutHub,
    pub config: Arc<Config>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/jobs/:job_type", post(routes::jobs::enqueue))
        .route("/api/jobs/:job_type/bulk", post(routes::jobs::enqueue_bulk))
        .route(
            "/api/jobs/:job_type/category/:category_id",
            post(routes::jobs::enqueue_by_category),
        )
        .route("/api/jobs/:job_type/:job_id", get(routes::jobs::get_job))
        .route(
            "/api/jobs/:job_type/group/:parent_id",
            get(routes::jobs::list_group),
        )
        .route("/api/events", get(routes::stream::events))
        .route(
            "/api/subscriptions/:subscriber_id/monitor",
            post(routes::stream::monitor),
        )
        .route(
            "/api/subscriptions/:subscriber_id/unmonitor",
            post(routes::stream::unmonitor),
        )
        .route("/api/admin/queues", get(routes::admin::queues))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
