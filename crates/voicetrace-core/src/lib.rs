//! # VoiceTrace
//!
//! Execution tracing for a voice-driven code-generation pipeline.
//!
//! Every request flows through cooperating stages (speech transcription,
//! security validation, reasoning, code generation), each of which calls
//! external tools. VoiceTrace records one [`Trace`](models::Trace) per
//! request with per-stage and per-tool timing, token usage and cost, keeps
//! a bounded window of recent traces in memory, persists every trace as a
//! JSON record and answers summary and drill-down queries.
//!
//! ## Architecture
//!
//! - **Collector**: per-request [`Tracker`](collector::Tracker) and the cost model
//! - **Store**: durable JSON records plus the recency window
//! - **Query**: aggregate summary, filtered listing and detail lookups
//! - **API**: REST endpoints for dashboards and out-of-process ingestion
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use voicetrace::prelude::*;
//!
//! # async fn run() {
//! let costs = Arc::new(CostModel::new());
//! let store = TraceStore::in_memory(100);
//!
//! let mut tracker = Tracker::open("create a login function", costs);
//! let speech = tracker.begin_stage("speech");
//! tracker.end_stage(&speech, true, None);
//! if let Some(trace) = tracker.close(true, None) {
//!     store.put(trace).await;
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::collector::{CostModel, StageHandle, ToolCall, Tracker};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::query::QueryService;
    pub use crate::store::TraceStore;
}
