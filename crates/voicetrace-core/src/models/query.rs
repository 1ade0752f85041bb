//! Query types shared between the API, the CLI and the query service

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome filter for trace listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    /// Only traces with `success == true`
    Success,
    /// Only traces with `success == false`
    Failed,
}

impl StatusFilter {
    /// Whether a trace outcome passes the filter
    pub fn matches(self, success: bool) -> bool {
        match self {
            StatusFilter::Success => success,
            StatusFilter::Failed => !success,
        }
    }

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            StatusFilter::Success => "success",
            StatusFilter::Failed => "failed",
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status filter value
#[derive(Debug, Error)]
#[error("unknown status '{0}' (expected success or failed)")]
pub struct ParseStatusError(String);

impl FromStr for StatusFilter {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "successful" | "ok" => Ok(StatusFilter::Success),
            "failed" | "failure" | "error" => Ok(StatusFilter::Failed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Filter for listing traces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFilter {
    /// Case-insensitive substring of the query text
    pub text: Option<String>,

    /// Outcome filter
    pub status: Option<StatusFilter>,

    /// Keep only the most recent matches
    pub limit: Option<usize>,
}

impl TraceFilter {
    /// Filter on query text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Filter on outcome
    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = Some(status);
        self
    }

    /// Cap the number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_aliases() {
        assert_eq!("OK".parse::<StatusFilter>().unwrap(), StatusFilter::Success);
        assert_eq!("error".parse::<StatusFilter>().unwrap(), StatusFilter::Failed);
        assert_eq!(" failed ".parse::<StatusFilter>().unwrap(), StatusFilter::Failed);
        assert!("pending".parse::<StatusFilter>().is_err());
    }

    #[test]
    fn test_status_matches() {
        assert!(StatusFilter::Failed.matches(false));
        assert!(!StatusFilter::Failed.matches(true));
        assert!(StatusFilter::Success.matches(true));
    }
}
