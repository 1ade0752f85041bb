//! API handlers for the HTTP REST API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AggregateSummary, StatusFilter, Trace, TraceFilter};
use crate::query::QueryService;

/// Application state shared across handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Read side over the trace store
    pub queries: QueryService,
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Trace the error refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message: Some(message.into()),
            trace_id: None,
        }),
    )
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok`
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Aggregate summary over the recency window
pub async fn summary(State(state): State<AppState>) -> Json<AggregateSummary> {
    Json(state.queries.summary())
}

/// Query parameters for listing traces
#[derive(Debug, Deserialize)]
pub struct ListTracesQuery {
    /// Case-insensitive substring of the query text
    pub q: Option<String>,
    /// `success` or `failed`
    pub status: Option<String>,
    /// Keep only the most recent matches
    pub limit: Option<usize>,
}

/// List traces response
#[derive(Serialize)]
pub struct ListTracesResponse {
    /// Matching traces, oldest first
    pub traces: Vec<Trace>,
    /// Number of traces returned
    pub total: usize,
}

/// List traces in the window
pub async fn list_traces(
    State(state): State<AppState>,
    Query(query): Query<ListTracesQuery>,
) -> Result<Json<ListTracesResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<StatusFilter>)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string()))?;

    let filter = TraceFilter {
        text: query.q.filter(|q| !q.is_empty()),
        status,
        limit: query.limit,
    };

    let traces = state.queries.list(&filter);
    let total = traces.len();
    Ok(Json(ListTracesResponse { traces, total }))
}

/// Get a single trace by id
pub async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<Trace>, ApiError> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "not_found".to_string(),
                message: None,
                trace_id: Some(trace_id.clone()),
            }),
        )
    };

    let id = Uuid::parse_str(&trace_id).map_err(|_| not_found())?;
    state.queries.detail(&id).map(Json).ok_or_else(not_found)
}

/// Trace ingestion response
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestTraceResponse {
    /// Id of the stored trace
    pub trace_id: Uuid,
}

/// Ingest a finalized trace produced by an out-of-process tracker
pub async fn ingest_trace(
    State(state): State<AppState>,
    Json(trace): Json<Trace>,
) -> Result<(StatusCode, Json<IngestTraceResponse>), ApiError> {
    if let Err(e) = trace.validate() {
        warn!(trace_id = %trace.id, error = %e, "Rejected ingested trace");
        return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_trace", e.to_string()));
    }

    let trace_id = trace.id;
    state.queries.store().put(trace).await;
    debug!(%trace_id, "Trace ingested");

    Ok((StatusCode::CREATED, Json(IngestTraceResponse { trace_id })))
}
