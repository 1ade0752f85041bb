//! Span data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Usd;
use crate::error::{Error, Result};

/// Kind of span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// A pipeline phase (speech, security, reasoning, coding, ...)
    Stage,
    /// One external-service call made inside a stage
    Tool,
}

/// Where a tool span's token counts came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// Counts reported by the provider
    #[default]
    Reported,
    /// Counts estimated from payload sizes
    Estimated,
}

/// Fields shared by every span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Kind of span
    pub kind: SpanKind,

    /// Stage or tool identifier
    pub name: String,

    /// Creation order within the trace
    pub sequence_index: u64,

    /// When the work started
    pub started_at: DateTime<Utc>,

    /// When the work ended (unset while open)
    pub ended_at: Option<DateTime<Utc>>,

    /// Token usage
    pub token_count: u64,

    /// Whether the work succeeded
    pub success: bool,

    /// Failure description, only when `success` is false
    pub error_message: Option<String>,
}

impl Span {
    pub(crate) fn open(
        kind: SpanKind,
        name: impl Into<String>,
        sequence_index: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            sequence_index,
            started_at,
            ended_at: None,
            token_count: 0,
            success: false,
            error_message: None,
        }
    }

    /// Close the span. Returns `false` when it was already closed.
    ///
    /// An `ended_at` earlier than `started_at` is clamped to `started_at`.
    pub(crate) fn close(
        &mut self,
        ended_at: DateTime<Utc>,
        success: bool,
        error: Option<String>,
    ) -> bool {
        if self.ended_at.is_some() {
            return false;
        }
        self.ended_at = Some(ended_at.max(self.started_at));
        self.success = success;
        self.error_message = if success { None } else { error };
        true
    }

    /// Whether the span has an end time
    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Duration in milliseconds, once closed
    pub fn duration_ms(&self) -> Option<f64> {
        self.ended_at.map(|ended_at| {
            (ended_at - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0
        })
    }

    fn validate(&self, expected: SpanKind) -> Result<()> {
        if self.kind != expected {
            return Err(Error::validation(format!(
                "span {} '{}' has kind {:?}, expected {:?}",
                self.sequence_index, self.name, self.kind, expected
            )));
        }
        match self.ended_at {
            None => Err(Error::validation(format!(
                "span {} '{}' was never closed",
                self.sequence_index, self.name
            ))),
            Some(ended_at) if ended_at < self.started_at => Err(Error::validation(format!(
                "span {} '{}' ends before it starts",
                self.sequence_index, self.name
            ))),
            Some(_) if self.success && self.error_message.is_some() => {
                Err(Error::validation(format!(
                    "span {} '{}' succeeded but carries an error",
                    self.sequence_index, self.name
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

/// A pipeline stage and the tool calls made inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpan {
    /// Common span fields (`token_count` is the sum over `tools`)
    #[serde(flatten)]
    pub span: Span,

    /// Sum of the tools' costs
    pub cost: Usd,

    /// Tool calls in invocation order
    pub tools: Vec<ToolSpan>,
}

impl StageSpan {
    pub(crate) fn open(
        name: impl Into<String>,
        sequence_index: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            span: Span::open(SpanKind::Stage, name, sequence_index, started_at),
            cost: Usd::ZERO,
            tools: Vec::new(),
        }
    }

    pub(crate) fn attach(&mut self, tool: ToolSpan) {
        self.span.token_count = self.span.token_count.saturating_add(tool.span.token_count);
        self.cost += tool.cost;
        self.tools.push(tool);
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.span.name
    }

    /// Names of the tools used, in call order
    pub fn tools_used(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.span.name.as_str()).collect()
    }

    /// Check kind tags, closure, ordering and derived sums
    pub fn validate(&self) -> Result<()> {
        self.span.validate(SpanKind::Stage)?;
        for tool in &self.tools {
            tool.validate()?;
        }

        let tokens = checked_token_sum(self.tools.iter().map(|t| t.span.token_count))
            .ok_or_else(|| {
                Error::validation(format!("stage '{}' token count overflows", self.span.name))
            })?;
        let cost: Usd = self.tools.iter().map(|t| t.cost).sum();
        if tokens != self.span.token_count || cost != self.cost {
            return Err(Error::validation(format!(
                "stage '{}' totals do not match its tools",
                self.span.name
            )));
        }
        Ok(())
    }
}

/// One external-service call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpan {
    /// Common span fields (`token_count = input_tokens + output_tokens`)
    #[serde(flatten)]
    pub span: Span,

    /// Pricing key used for the cost lookup
    pub provider: String,

    /// Characters passed in
    pub input_size: u64,

    /// Characters returned
    pub output_size: u64,

    /// Input tokens priced
    pub input_tokens: u64,

    /// Output tokens priced
    pub output_tokens: u64,

    /// Whether token counts were reported or estimated
    pub token_source: TokenSource,

    /// Cost computed when the call was recorded
    pub cost: Usd,
}

impl ToolSpan {
    /// Tool name
    pub fn name(&self) -> &str {
        &self.span.name
    }

    /// Check kind tag, closure and the token split
    pub fn validate(&self) -> Result<()> {
        self.span.validate(SpanKind::Tool)?;
        let total = self.input_tokens.checked_add(self.output_tokens).ok_or_else(|| {
            Error::validation(format!("tool '{}' token count overflows", self.span.name))
        })?;
        if total != self.span.token_count {
            return Err(Error::validation(format!(
                "tool '{}' token split does not add up",
                self.span.name
            )));
        }
        Ok(())
    }
}

/// Sum of token counts, `None` on overflow
pub(crate) fn checked_token_sum(counts: impl IntoIterator<Item = u64>) -> Option<u64> {
    counts
        .into_iter()
        .try_fold(0u64, |total, count| total.checked_add(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_close_twice_is_rejected() {
        let start = Utc::now();
        let mut span = Span::open(SpanKind::Stage, "speech", 0, start);
        assert!(span.close(start + Duration::milliseconds(5), false, Some("boom".into())));
        assert!(!span.close(start + Duration::milliseconds(9), true, None));
        assert!(!span.success);
        assert_eq!(span.error_message.as_deref(), Some("boom"));
        assert_eq!(span.duration_ms(), Some(5.0));
    }

    #[test]
    fn test_close_clamps_end_before_start() {
        let start = Utc::now();
        let mut span = Span::open(SpanKind::Tool, "llm", 3, start);
        span.close(start - Duration::seconds(1), true, Some("ignored".into()));
        assert_eq!(span.ended_at, Some(start));
        assert_eq!(span.error_message, None);
    }

    #[test]
    fn test_stage_kind_is_checked() {
        let start = Utc::now();
        let mut stage = StageSpan::open("planning", 0, start);
        stage.span.kind = SpanKind::Tool;
        stage.span.close(start, true, None);
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_stage_json_is_flat() {
        let start = Utc::now();
        let mut stage = StageSpan::open("coding", 1, start);
        stage.span.close(start, true, None);
        let value = serde_json::to_value(&stage).unwrap();
        assert_eq!(value["kind"], "stage");
        assert_eq!(value["name"], "coding");
        assert!(value["error_message"].is_null());
        assert!(value["tools"].as_array().unwrap().is_empty());
    }

    fn tool(input_tokens: u64, output_tokens: u64, token_count: u64) -> ToolSpan {
        let start = Utc::now();
        let mut span = Span::open(SpanKind::Tool, "llm_tool", 1, start);
        span.token_count = token_count;
        span.close(start, true, None);
        ToolSpan {
            span,
            provider: "llama-3.3-70b-versatile".to_string(),
            input_size: 0,
            output_size: 0,
            input_tokens,
            output_tokens,
            token_source: TokenSource::Reported,
            cost: Usd::ZERO,
        }
    }

    #[test]
    fn test_token_overflow_is_a_validation_error() {
        let err = tool(u64::MAX, 1, 400).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let start = Utc::now();
        let mut stage = StageSpan::open("coding", 0, start);
        stage.span.close(start, true, None);
        stage.span.token_count = u64::MAX;
        stage.tools = vec![tool(u64::MAX, 0, u64::MAX), tool(1, 0, 1)];
        assert!(matches!(stage.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_tools_used_in_call_order() {
        let start = Utc::now();
        let mut stage = StageSpan::open("speech", 0, start);
        let mut stt = tool(0, 0, 0);
        stt.span.name = "google_stt_enhanced".to_string();
        stage.attach(stt);
        stage.attach(tool(3, 4, 7));
        assert_eq!(stage.tools_used(), vec!["google_stt_enhanced", "llm_tool"]);
        assert_eq!(stage.span.token_count, 7);
    }

    #[test]
    fn test_attach_saturates_token_count() {
        let start = Utc::now();
        let mut stage = StageSpan::open("coding", 0, start);
        stage.attach(tool(u64::MAX, 0, u64::MAX));
        stage.attach(tool(5, 0, 5));
        assert_eq!(stage.span.token_count, u64::MAX);
    }
}
