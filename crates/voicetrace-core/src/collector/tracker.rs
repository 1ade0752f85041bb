//! Per-request execution tracker
//!
//! A [`Tracker`] is the mutable builder for exactly one pipeline invocation.
//! It is owned by the driver that opened it and is never shared, so it needs
//! no locking. Every misuse (unknown handle, double close, mutation after
//! close) is logged and ignored: instrumentation must never be able to break
//! the pipeline it observes.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cost::{CostModel, TokenUsage};
use crate::models::{Span, SpanKind, StageSpan, ToolSpan, Trace, Usd};

/// One external-service call, reported after it finished
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Pricing key (defaults to `name`)
    pub provider: Option<String>,
    /// When the call started
    pub started_at: DateTime<Utc>,
    /// When the call ended
    pub ended_at: DateTime<Utc>,
    /// Characters passed in
    pub input_size: u64,
    /// Characters returned
    pub output_size: u64,
    /// Provider-reported usage; estimated from sizes when absent
    pub usage: Option<TokenUsage>,
    /// Audio length for per-minute providers; wall-clock duration when absent
    pub audio_seconds: Option<f64>,
    /// Whether the call succeeded
    pub success: bool,
    /// Failure description
    pub error: Option<String>,
}

impl ToolCall {
    /// A successful call with no payload or usage recorded yet
    pub fn new(
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            provider: None,
            started_at,
            ended_at,
            input_size: 0,
            output_size: 0,
            usage: None,
            audio_seconds: None,
            success: true,
            error: None,
        }
    }

    /// Price under a different key than the tool name
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Payload sizes in characters
    pub fn with_sizes(mut self, input_size: u64, output_size: u64) -> Self {
        self.input_size = input_size;
        self.output_size = output_size;
        self
    }

    /// Provider-reported token usage
    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage::new(input_tokens, output_tokens));
        self
    }

    /// Length of the transcribed audio
    pub fn with_audio_seconds(mut self, seconds: f64) -> Self {
        self.audio_seconds = Some(seconds);
        self
    }

    /// Mark the call as failed
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Key used for the pricing lookup
    pub fn pricing_key(&self) -> &str {
        self.provider.as_deref().unwrap_or(&self.name)
    }

    /// Wall-clock duration in seconds (zero if the clock went backwards)
    pub fn duration_seconds(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Reference to a stage span inside one tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageHandle {
    trace_id: Option<Uuid>,
    index: usize,
}

impl StageHandle {
    fn detached() -> Self {
        Self {
            trace_id: None,
            index: 0,
        }
    }

    /// Whether the handle was refused at `begin_stage`; calls using it are ignored
    pub fn is_detached(&self) -> bool {
        self.trace_id.is_none()
    }
}

/// Builder and state machine for one in-flight trace
///
/// `trace` is `Some` while open and `None` once closed.
#[derive(Debug)]
pub struct Tracker {
    id: Uuid,
    trace: Option<Trace>,
    costs: Arc<CostModel>,
    next_sequence: u64,
}

impl Tracker {
    /// Open a new trace for a request
    pub fn open(query_text: impl Into<String>, costs: Arc<CostModel>) -> Self {
        let id = Uuid::now_v7();
        let trace = Trace {
            id,
            query_text: query_text.into(),
            started_at: Utc::now(),
            ended_at: None,
            stage_spans: Vec::new(),
            success: false,
            error_message: None,
            total_tokens: 0,
            total_cost: Usd::ZERO,
            total_latency_ms: 0.0,
        };

        debug!(trace_id = %id, query = %trace.query_text, "Trace opened");

        Self {
            id,
            trace: Some(trace),
            costs,
            next_sequence: 0,
        }
    }

    /// Trace id, stable across the whole lifecycle
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether `close` has not run yet
    pub fn is_open(&self) -> bool {
        self.trace.is_some()
    }

    /// Copy of the in-progress trace with its running totals, for
    /// persisting partial progress. `None` once closed.
    pub fn snapshot(&self) -> Option<Trace> {
        self.trace.clone()
    }

    /// Tokens recorded so far; zero once closed
    pub fn running_tokens(&self) -> u64 {
        self.trace.as_ref().map_or(0, |t| t.total_tokens)
    }

    /// Cost recorded so far; zero once closed
    pub fn running_cost(&self) -> Usd {
        self.trace.as_ref().map_or(Usd::ZERO, |t| t.total_cost)
    }

    fn next_sequence(&mut self) -> u64 {
        let index = self.next_sequence;
        self.next_sequence += 1;
        index
    }

    /// Start a stage. A name that is already open, or a closed tracker,
    /// yields a detached handle.
    pub fn begin_stage(&mut self, name: impl Into<String>) -> StageHandle {
        let name = name.into();
        let id = self.id;
        let sequence_index = self.next_sequence;

        let Some(trace) = self.trace.as_mut() else {
            misuse(id, "begin_stage", "tracker is closed");
            return StageHandle::detached();
        };

        if trace
            .stage_spans
            .iter()
            .any(|stage| stage.name() == name && !stage.span.is_closed())
        {
            misuse(id, "begin_stage", &format!("stage '{name}' is already open"));
            return StageHandle::detached();
        }

        debug!(trace_id = %id, stage = %name, sequence_index, "Stage started");
        trace
            .stage_spans
            .push(StageSpan::open(name, sequence_index, Utc::now()));
        let index = trace.stage_spans.len() - 1;
        self.next_sequence();

        StageHandle {
            trace_id: Some(id),
            index,
        }
    }

    /// Resolve a handle to a stage index in the open trace
    fn resolve(&self, handle: &StageHandle, op: &str) -> Option<usize> {
        let Some(trace) = self.trace.as_ref() else {
            misuse(self.id, op, "tracker is closed");
            return None;
        };
        match handle.trace_id {
            None => {
                misuse(self.id, op, "stage handle is detached");
                None
            }
            Some(owner) if owner != self.id => {
                misuse(self.id, op, "stage handle belongs to another trace");
                None
            }
            Some(_) if handle.index >= trace.stage_spans.len() => {
                misuse(self.id, op, "unknown stage handle");
                None
            }
            Some(_) => Some(handle.index),
        }
    }

    /// Close a stage. A failure records its message on the trace when the
    /// trace has no error yet.
    pub fn end_stage(&mut self, handle: &StageHandle, success: bool, error: Option<String>) {
        let Some(index) = self.resolve(handle, "end_stage") else {
            return;
        };
        let id = self.id;
        let Some(trace) = self.trace.as_mut() else {
            return;
        };

        let stage = &mut trace.stage_spans[index];
        if stage.span.is_closed() {
            misuse(id, "end_stage", &format!("stage '{}' is already closed", stage.name()));
            return;
        }

        let error = if success {
            None
        } else {
            Some(error.unwrap_or_else(|| format!("stage '{}' failed", stage.name())))
        };
        stage.span.close(Utc::now(), success, error.clone());

        debug!(
            trace_id = %id,
            stage = %stage.name(),
            success,
            duration_ms = stage.span.duration_ms().unwrap_or(0.0),
            "Stage ended"
        );

        if let Some(error) = error {
            trace.error_message.get_or_insert(error);
        }
    }

    /// Attach a finished tool call under a stage (open or already closed),
    /// price it, and add it to the running totals. Returns the sequence
    /// index assigned to the tool span.
    pub fn record_tool(&mut self, handle: &StageHandle, call: ToolCall) -> Option<u64> {
        let index = self.resolve(handle, "record_tool")?;

        if call.ended_at < call.started_at {
            warn!(
                trace_id = %self.id,
                tool = %call.name,
                "Tool call ends before it starts, clamping end time"
            );
        }

        let priced = self.costs.price_tool(&call);
        let provider = call.pricing_key().to_string();
        let sequence_index = self.next_sequence();

        let mut span = Span::open(SpanKind::Tool, call.name, sequence_index, call.started_at);
        span.token_count = priced.usage.total();
        let error = if call.success {
            None
        } else {
            Some(call.error.unwrap_or_else(|| format!("tool '{}' failed", span.name)))
        };
        span.close(call.ended_at, call.success, error);

        let tool = ToolSpan {
            span,
            provider,
            input_size: call.input_size,
            output_size: call.output_size,
            input_tokens: priced.usage.input_tokens,
            output_tokens: priced.usage.output_tokens,
            token_source: priced.source,
            cost: priced.cost,
        };

        let trace = self.trace.as_mut()?;
        debug!(
            trace_id = %trace.id,
            tool = %tool.name(),
            sequence_index,
            tokens = tool.span.token_count,
            cost = %tool.cost,
            success = tool.span.success,
            "Tool recorded"
        );

        trace.total_tokens = trace.total_tokens.saturating_add(tool.span.token_count);
        trace.total_cost += tool.cost;
        trace.stage_spans[index].attach(tool);

        Some(sequence_index)
    }

    /// Run `f` inside a stage, ending it with the closure's outcome. The
    /// error's `Display` text becomes the stage error message.
    pub fn run_stage<T, E, F>(&mut self, name: impl Into<String>, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce(&mut Self, &StageHandle) -> Result<T, E>,
    {
        let handle = self.begin_stage(name);
        let result = f(self, &handle);
        match &result {
            Ok(_) => self.end_stage(&handle, true, None),
            Err(e) => self.end_stage(&handle, false, Some(e.to_string())),
        }
        result
    }

    /// Finalize the trace.
    ///
    /// Stages left open are closed as failed with an "incomplete" message.
    /// Error precedence: the first stage error recorded while open, then
    /// `error`, then the first incomplete-stage message. The trace succeeds
    /// only if `success` is true, `error` is `None` and every stage
    /// succeeded. Returns `None` if the tracker was already closed.
    pub fn close(&mut self, success: bool, error: Option<String>) -> Option<Trace> {
        let Some(mut trace) = self.trace.take() else {
            misuse(self.id, "close", "tracker is already closed");
            return None;
        };

        let now = Utc::now().max(trace.started_at);
        let mut incomplete = None;
        for stage in trace.stage_spans.iter_mut().filter(|s| !s.span.is_closed()) {
            let message = format!("stage '{}' incomplete", stage.name());
            warn!(trace_id = %trace.id, stage = %stage.name(), "Stage left open at close");
            stage.span.close(now, false, Some(message.clone()));
            incomplete.get_or_insert(message);
        }

        let all_stages_ok = trace.stage_spans.iter().all(|s| s.span.success);
        trace.success = success && error.is_none() && all_stages_ok;
        if trace.error_message.is_none() {
            trace.error_message = error.or(incomplete);
        }

        trace.ended_at = Some(now);
        trace.total_latency_ms =
            (now - trace.started_at).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0;

        metrics::counter!(
            "voicetrace_traces_closed_total",
            "outcome" => if trace.success { "success" } else { "failed" }
        )
        .increment(1);

        info!(
            trace_id = %trace.id,
            success = trace.success,
            stages = trace.stage_spans.len(),
            total_tokens = trace.total_tokens,
            total_cost = %trace.total_cost,
            latency_ms = trace.total_latency_ms,
            "Trace closed"
        );

        Some(trace)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Some(trace) = &self.trace {
            warn!(
                trace_id = %trace.id,
                query = %trace.query_text,
                "Tracker dropped without close, trace abandoned"
            );
        }
    }
}

fn misuse(trace_id: Uuid, op: &str, reason: &str) {
    metrics::counter!("voicetrace_tracker_misuse_total", "op" => op.to_string()).increment(1);
    warn!(%trace_id, op, reason, "Tracker misuse ignored");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn costs() -> Arc<CostModel> {
        Arc::new(CostModel::new())
    }

    fn llm_call(input: u64, output: u64) -> ToolCall {
        let start = Utc::now();
        ToolCall::new("llm_tool", start, start + Duration::milliseconds(120))
            .with_provider("llama-3.3-70b-versatile")
            .with_sizes(input * 4, output * 4)
            .with_tokens(input, output)
    }

    #[test]
    fn test_sequence_indices_follow_call_order() {
        let mut tracker = Tracker::open("q", costs());
        let speech = tracker.begin_stage("speech");
        assert_eq!(tracker.record_tool(&speech, llm_call(1, 1)), Some(1));
        let planning = tracker.begin_stage("planning");
        assert_eq!(tracker.record_tool(&speech, llm_call(1, 1)), Some(3));
        tracker.end_stage(&speech, true, None);
        tracker.end_stage(&planning, true, None);

        let trace = tracker.close(true, None).unwrap();
        let indices: Vec<u64> = trace
            .stage_spans
            .iter()
            .flat_map(|s| {
                std::iter::once(s.span.sequence_index)
                    .chain(s.tools.iter().map(|t| t.span.sequence_index))
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 3, 2]);
        assert_eq!(trace.stage_spans[0].tools_used(), vec!["llm_tool", "llm_tool"]);
        assert_eq!(trace.span_count(), 4);
        trace.validate().unwrap();
    }

    #[test]
    fn test_duplicate_open_stage_is_detached() {
        let mut tracker = Tracker::open("q", costs());
        let first = tracker.begin_stage("coding");
        let second = tracker.begin_stage("coding");
        assert!(!first.is_detached());
        assert!(second.is_detached());

        assert_eq!(tracker.record_tool(&second, llm_call(5, 5)), None);
        tracker.end_stage(&second, false, Some("ignored".into()));
        tracker.end_stage(&first, true, None);

        // the same name may run again once closed
        let retry = tracker.begin_stage("coding");
        assert!(!retry.is_detached());
        tracker.end_stage(&retry, true, None);

        let trace = tracker.close(true, None).unwrap();
        assert_eq!(trace.stage_spans.len(), 2);
        assert!(trace.success);
        assert_eq!(trace.total_tokens, 0);
    }

    #[test]
    fn test_misuse_after_close_is_ignored() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("speech");
        tracker.end_stage(&stage, true, None);
        assert!(tracker.close(true, None).is_some());
        assert!(!tracker.is_open());

        assert!(tracker.begin_stage("late").is_detached());
        assert_eq!(tracker.record_tool(&stage, llm_call(1, 1)), None);
        tracker.end_stage(&stage, false, None);
        assert!(tracker.close(false, Some("again".into())).is_none());
        assert!(tracker.snapshot().is_none());
    }

    #[test]
    fn test_foreign_handle_is_ignored() {
        let mut a = Tracker::open("a", costs());
        let mut b = Tracker::open("b", costs());
        let handle = a.begin_stage("speech");
        assert_eq!(b.record_tool(&handle, llm_call(10, 10)), None);
        b.end_stage(&handle, false, Some("wrong".into()));

        let trace_b = b.close(true, None).unwrap();
        assert!(trace_b.success);
        assert_eq!(trace_b.error_message, None);

        a.end_stage(&handle, true, None);
        assert!(a.close(true, None).unwrap().success);
    }

    #[test]
    fn test_end_stage_twice_keeps_first_outcome() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("security");
        tracker.end_stage(&stage, false, Some("blocked".into()));
        tracker.end_stage(&stage, true, None);

        let trace = tracker.close(true, None).unwrap();
        let security = trace.stage("security").unwrap();
        assert!(!security.span.success);
        assert_eq!(security.span.error_message.as_deref(), Some("blocked"));
        assert!(!trace.success);
        assert_eq!(trace.error_message.as_deref(), Some("blocked"));
    }

    #[test]
    fn test_first_stage_error_wins() {
        let mut tracker = Tracker::open("q", costs());
        let a = tracker.begin_stage("reasoning");
        tracker.end_stage(&a, false, None);
        let b = tracker.begin_stage("coding");
        tracker.end_stage(&b, false, Some("second".into()));

        let trace = tracker.close(false, Some("close error".into())).unwrap();
        assert_eq!(trace.error_message.as_deref(), Some("stage 'reasoning' failed"));
    }

    #[test]
    fn test_tool_failure_does_not_fail_stage() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("reasoning");
        let call = llm_call(10, 20).failed("rate limited");
        tracker.record_tool(&stage, call);
        tracker.end_stage(&stage, true, None);

        let trace = tracker.close(true, None).unwrap();
        assert!(trace.success);
        assert_eq!(trace.error_message, None);
        let tool = &trace.stage_spans[0].tools[0];
        assert!(!tool.span.success);
        assert_eq!(tool.span.error_message.as_deref(), Some("rate limited"));
        assert_eq!(trace.total_tokens, 30);
    }

    #[test]
    fn test_tool_on_closed_stage_still_counts() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("speech");
        tracker.end_stage(&stage, true, None);
        tracker.record_tool(&stage, llm_call(100, 0));

        let trace = tracker.close(true, None).unwrap();
        assert_eq!(trace.stage_spans[0].span.token_count, 100);
        assert_eq!(trace.total_tokens, 100);
        trace.validate().unwrap();
    }

    #[test]
    fn test_snapshot_has_running_totals() {
        let mut tracker = Tracker::open("partial", costs());
        let stage = tracker.begin_stage("coding");
        tracker.record_tool(&stage, llm_call(1000, 200));

        let snapshot = tracker.snapshot().unwrap();
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.total_tokens, 1200);
        assert_eq!(tracker.running_tokens(), 1200);
        assert_eq!(tracker.running_cost(), snapshot.total_cost);
        assert_eq!(
            snapshot.total_cost,
            CostModel::new().price_for("llama-3.3-70b-versatile", 1000, 200)
        );
        assert!(snapshot.validate().is_err());

        tracker.end_stage(&stage, true, None);
        tracker.close(true, None);
        assert_eq!(tracker.running_tokens(), 0);
    }

    #[test]
    fn test_run_stage_records_outcome() {
        let mut tracker = Tracker::open("q", costs());
        let ok: Result<u32, String> = tracker.run_stage("speech", |t, h| {
            t.record_tool(h, llm_call(3, 4));
            Ok(7)
        });
        assert_eq!(ok, Ok(7));
        let err: Result<(), String> =
            tracker.run_stage("security", |_, _| Err("unsafe command".to_string()));
        assert!(err.is_err());

        let trace = tracker.close(true, None).unwrap();
        assert!(trace.stage("speech").unwrap().span.success);
        assert_eq!(trace.error_message.as_deref(), Some("unsafe command"));
        assert!(!trace.success);
    }

    #[test]
    fn test_estimated_tokens_are_totalled() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("security");
        let start = Utc::now();
        tracker.record_tool(
            &stage,
            ToolCall::new("sanitizer", start, start).with_sizes(40, 39),
        );
        tracker.end_stage(&stage, true, None);

        let trace = tracker.close(true, None).unwrap();
        let tool = &trace.stage_spans[0].tools[0];
        assert_eq!(tool.token_source, crate::models::TokenSource::Estimated);
        assert_eq!(tool.span.token_count, 20);
        assert_eq!(trace.total_tokens, 20);
        assert_eq!(trace.total_cost, Usd::ZERO);
    }

    #[test]
    fn test_huge_usage_saturates_totals() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("coding");
        let start = Utc::now();
        let huge = ToolCall::new("llm_tool", start, start).with_tokens(u64::MAX, 1);
        assert_eq!(tracker.record_tool(&stage, huge), Some(1));
        tracker.record_tool(&stage, llm_call(10, 10));
        tracker.end_stage(&stage, true, None);

        let trace = tracker.close(true, None).unwrap();
        assert_eq!(trace.stage_spans[0].tools[0].span.token_count, u64::MAX);
        assert_eq!(trace.stage_spans[0].span.token_count, u64::MAX);
        assert_eq!(trace.total_tokens, u64::MAX);
        assert!(trace.validate().is_err());
    }

    #[test]
    fn test_tool_ending_before_start_is_clamped() {
        let mut tracker = Tracker::open("q", costs());
        let stage = tracker.begin_stage("speech");
        let start = Utc::now();
        let call = ToolCall::new("google_stt_enhanced", start, start - Duration::seconds(2))
            .with_tokens(0, 0);
        assert_eq!(tracker.record_tool(&stage, call), Some(1));
        tracker.end_stage(&stage, true, None);

        let trace = tracker.close(true, None).unwrap();
        let tool = &trace.stage_spans[0].tools[0];
        assert_eq!(tool.span.ended_at, Some(start));
        assert_eq!(tool.span.duration_ms(), Some(0.0));
        // no audio length and no wall-clock time, so nothing to bill
        assert_eq!(tool.cost, Usd::ZERO);
        trace.validate().unwrap();
    }
}
