//! flock — a multi-tenant job-orchestration backend for driving fleets of
//! authenticated Bluesky accounts through rate-sensitive workloads.
//!
//! Layering:
//! - `common` — shared DTOs, ids and the error taxonomy
//! - `kernel` — infrastructure: queueing fleet, worker pools, auth recovery,
//!   event fan-out. No business logic.
//! - `domains` — the executors (engagement, posting, chat)
//! - `server` — the axum edge

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
