//! Data models for VoiceTrace

mod metrics;
mod query;
mod span;
mod trace;
mod usd;

pub use metrics::*;
pub use query::*;
pub use span::*;
pub use trace::*;
pub use usd::Usd;

pub(crate) use usd::round_div;
