//! # CrawlForge Monitoring API
//!
//! Read-only HTTP surface over Store, Progress, and Rotation Manager
//! state (§4.9). Grounded in the teacher's `riptide-api` — a single
//! `Router` built from a `handlers` module against a `Clone`-able,
//! `Arc`-backed state struct, with `tower-http`'s `TraceLayer` for
//! request logging — scoped down to this spec's five read-only routes
//! (no mutating endpoints, no auth/session/streaming layers, which belong
//! to the teacher's much larger crawl-serving surface, not this engine's
//! monitoring surface).

pub mod errors;
pub mod handlers;
pub mod log_buffer;
pub mod state;

pub use log_buffer::{BufferMakeWriter, LogBuffer};
pub use state::ApiState;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the Monitoring API router (§4.9). The caller (the Supervisor,
/// §4.10) owns binding the listener and running the server alongside the
/// Scheduler loop.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/progress", get(handlers::progress))
        .route("/stats", get(handlers::stats))
        .route("/databases", get(handlers::databases))
        .route("/logs", get(handlers::logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
