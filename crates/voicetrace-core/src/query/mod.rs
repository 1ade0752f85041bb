//! Read-side queries over the recency window
//!
//! Everything here is recomputed from the window on each call; nothing is
//! cached, so results always reflect the latest `put`.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::models::{AggregateSummary, Trace, TraceFilter, Usd};
use crate::store::TraceStore;

/// Summary, listing and detail queries
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<TraceStore>,
}

impl QueryService {
    /// Create a query service over a store
    pub fn new(store: Arc<TraceStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<TraceStore> {
        &self.store
    }

    /// Aggregate statistics over the whole window
    pub fn summary(&self) -> AggregateSummary {
        self.store.read(summarize)
    }

    /// Traces matching `filter`, oldest first. A limit keeps the most recent
    /// matches.
    pub fn list(&self, filter: &TraceFilter) -> Vec<Trace> {
        let needle = filter.text.as_deref().map(str::to_lowercase);

        let mut matches: Vec<Trace> = self.store.read(|traces| {
            traces
                .iter()
                .filter(|t| filter.status.map_or(true, |s| s.matches(t.success)))
                .filter(|t| {
                    needle
                        .as_deref()
                        .map_or(true, |n| t.query_text.to_lowercase().contains(n))
                })
                .cloned()
                .collect()
        });
        matches.sort_by_key(|t| (t.started_at, t.id));

        if let Some(limit) = filter.limit {
            let skip = matches.len().saturating_sub(limit);
            matches.drain(..skip);
        }
        matches
    }

    /// Full trace by id, if still in the window
    pub fn detail(&self, id: &Uuid) -> Option<Trace> {
        self.store.get(id)
    }
}

/// Compute the aggregate summary of a set of traces
pub fn summarize(traces: &[Trace]) -> AggregateSummary {
    if traces.is_empty() {
        return AggregateSummary::default();
    }

    let successful = traces.iter().filter(|t| t.success).count();
    let latency: f64 = traces.iter().map(|t| t.total_latency_ms).sum();

    let stages: HashSet<&str> = traces
        .iter()
        .flat_map(|t| t.stage_spans.iter().map(|s| s.name()))
        .collect();
    let tools: HashSet<&str> = traces
        .iter()
        .flat_map(|t| t.tool_spans().map(|s| s.name()))
        .collect();

    AggregateSummary {
        total_requests: traces.len(),
        successful_requests: successful,
        failed_requests: traces.len() - successful,
        total_tokens: traces
            .iter()
            .fold(0u64, |total, t| total.saturating_add(t.total_tokens)),
        total_cost: traces.iter().map(|t| t.total_cost).sum::<Usd>(),
        average_latency_ms: latency / traces.len() as f64,
        distinct_stage_names_used: stages.len(),
        distinct_tool_names_used: tools.len(),
    }
}
