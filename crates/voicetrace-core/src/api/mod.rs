//! REST API implementation
//!
//! Read-only views of the recency window for dashboards, plus an ingest
//! endpoint for traces closed by out-of-process trackers.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};
use crate::query::QueryService;

/// HTTP API server
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(queries: QueryService) -> Self {
        Self {
            state: AppState { queries },
        }
    }

    /// Router with CORS and request tracing layers applied
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP server, returning when ctrl-c is received
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::internal(format!("failed to bind {addr}: {e}")))?;

        info!("HTTP server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            })
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        Ok(())
    }
}
