//! Aggregate metrics models

use serde::{Deserialize, Serialize};

use super::Usd;

/// Summary statistics over the recency window, recomputed on every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    /// Traces in the window
    pub total_requests: usize,

    /// Traces with `success == true`
    pub successful_requests: usize,

    /// Traces with `success == false`
    pub failed_requests: usize,

    /// Sum of trace token totals
    pub total_tokens: u64,

    /// Sum of trace costs
    pub total_cost: Usd,

    /// Mean trace latency in milliseconds
    pub average_latency_ms: f64,

    /// Number of distinct stage names seen
    pub distinct_stage_names_used: usize,

    /// Number of distinct tool names seen
    pub distinct_tool_names_used: usize,
}

impl AggregateSummary {
    /// Fraction of requests that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
