//! Collector module - per-request tracking and cost computation
//!
//! The pipeline driver opens a [`Tracker`] per request, reports stages and
//! tool calls into it, and hands the closed [`Trace`](crate::models::Trace)
//! to the [`TraceStore`](crate::store::TraceStore).

mod cost;
pub mod seed;
mod tracker;

pub use cost::{CostModel, ModelPricing, PricedUsage, PricingUnit, TokenUsage, CHARS_PER_TOKEN};
pub use tracker::{StageHandle, ToolCall, Tracker};
