//! API routes

use axum::{routing::get, Router};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/summary", get(handlers::summary))
        .route(
            "/api/v1/traces",
            get(handlers::list_traces).post(handlers::ingest_trace),
        )
        .route("/api/v1/traces/:trace_id", get(handlers::get_trace))
        .with_state(state)
}
