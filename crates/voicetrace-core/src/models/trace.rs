//! Trace data model

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::span::checked_token_sum;
use super::{StageSpan, ToolSpan, Usd};
use crate::error::{Error, Result};

/// The full record of one end-to-end pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Time-ordered unique identifier (UUID v7)
    pub id: Uuid,

    /// The request text being processed
    pub query_text: String,

    /// When the trace was opened
    pub started_at: DateTime<Utc>,

    /// When the trace was closed (unset for in-progress snapshots)
    pub ended_at: Option<DateTime<Utc>>,

    /// Stage spans in call order, each owning its tool spans
    pub stage_spans: Vec<StageSpan>,

    /// Overall outcome
    pub success: bool,

    /// First error encountered
    pub error_message: Option<String>,

    /// Sum of every tool's token count
    pub total_tokens: u64,

    /// Sum of every tool's cost
    pub total_cost: Usd,

    /// Close time minus open time, in milliseconds
    pub total_latency_ms: f64,
}

impl Trace {
    /// Check if the trace has been closed
    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// All tool spans, stage by stage
    pub fn tool_spans(&self) -> impl Iterator<Item = &ToolSpan> {
        self.stage_spans.iter().flat_map(|stage| stage.tools.iter())
    }

    /// First stage span with the given name
    pub fn stage(&self, name: &str) -> Option<&StageSpan> {
        self.stage_spans.iter().find(|stage| stage.name() == name)
    }

    /// Number of spans of both kinds
    pub fn span_count(&self) -> usize {
        self.stage_spans.len() + self.tool_spans().count()
    }

    /// Check that a trace read from disk or received over the wire obeys
    /// the closed-trace invariants.
    pub fn validate(&self) -> Result<()> {
        match self.ended_at {
            None => {
                return Err(Error::validation(format!("trace {} is not closed", self.id)));
            }
            Some(ended_at) if ended_at < self.started_at => {
                return Err(Error::validation(format!(
                    "trace {} ends before it starts",
                    self.id
                )));
            }
            Some(_) => {}
        }

        if !self.total_latency_ms.is_finite() || self.total_latency_ms < 0.0 {
            return Err(Error::validation(format!(
                "trace {} has an invalid latency",
                self.id
            )));
        }

        let mut sequence = HashSet::new();
        for stage in &self.stage_spans {
            stage.validate()?;
            let indices = std::iter::once(stage.span.sequence_index)
                .chain(stage.tools.iter().map(|t| t.span.sequence_index));
            for index in indices {
                if !sequence.insert(index) {
                    return Err(Error::validation(format!(
                        "trace {} reuses sequence index {}",
                        self.id, index
                    )));
                }
            }
        }

        let tokens = checked_token_sum(self.tool_spans().map(|t| t.span.token_count))
            .ok_or_else(|| {
                Error::validation(format!("trace {} token count overflows", self.id))
            })?;
        let cost: Usd = self.tool_spans().map(|t| t.cost).sum();
        if tokens != self.total_tokens || cost != self.total_cost {
            return Err(Error::validation(format!(
                "trace {} totals do not match its tool spans",
                self.id
            )));
        }

        if self.success && self.stage_spans.iter().any(|s| !s.span.success) {
            return Err(Error::validation(format!(
                "trace {} is marked successful but has a failed stage",
                self.id
            )));
        }

        Ok(())
    }
}
