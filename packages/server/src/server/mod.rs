//! The HTTP edge: a thin shell over the intake service and the fan-out hub.

pub mod app;
pub mod routes;

pub use app::{build_app, AppState};
