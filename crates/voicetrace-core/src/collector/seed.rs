//! Synthetic trace generation
//!
//! Drives the tracker through the speech → security → reasoning → coding
//! pipeline with random usage, for demos and dashboard development.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::cost::CostModel;
use super::tracker::{ToolCall, Tracker};
use crate::models::Trace;
use crate::store::TraceStore;

const QUERIES: &[&str] = &[
    "create a login function",
    "write a function that reverses a string",
    "add input validation to the signup form",
    "generate a REST endpoint for listing users",
    "refactor the parser into smaller functions",
    "write unit tests for the cart total",
];

/// Stage name, tool name, and whether the tool is a language model
const PIPELINE: &[(&str, &str, bool)] = &[
    ("speech", "google_stt_enhanced", false),
    ("security", "sanitizer", false),
    ("reasoning", "llm_tool", true),
    ("coding", "llm_tool", true),
];

/// Seeding parameters
#[derive(Debug, Clone)]
pub struct SeedOptions {
    /// Number of traces to generate
    pub traces: usize,
    /// Probability that a trace fails at a random stage
    pub failure_rate: f64,
    /// Pricing key for the language-model calls
    pub llm_provider: String,
    /// RNG seed for reproducible output
    pub seed: Option<u64>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            traces: 100,
            failure_rate: 0.1,
            llm_provider: "llama-3.3-70b-versatile".to_string(),
            seed: None,
        }
    }
}

/// Generate synthetic traces without persisting them
pub fn generate(costs: &Arc<CostModel>, options: &SeedOptions) -> Vec<Trace> {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let failure_rate = options.failure_rate.clamp(0.0, 1.0);

    (0..options.traces)
        .filter_map(|_| {
            let query = QUERIES.choose(&mut rng).copied().unwrap_or("create a login function");
            let fail_at = rng
                .gen_bool(failure_rate)
                .then(|| rng.gen_range(0..PIPELINE.len()));
            run_pipeline(&mut rng, Arc::clone(costs), query, &options.llm_provider, fail_at)
        })
        .collect()
}

/// Generate synthetic traces and put them into the store
pub async fn seed(store: &TraceStore, costs: &Arc<CostModel>, options: &SeedOptions) -> usize {
    let traces = generate(costs, options);
    let count = traces.len();
    for trace in traces {
        store.put(trace).await;
    }
    info!(count, "Seeded synthetic traces");
    count
}

fn run_pipeline(
    rng: &mut StdRng,
    costs: Arc<CostModel>,
    query: &str,
    llm_provider: &str,
    fail_at: Option<usize>,
) -> Option<Trace> {
    let mut tracker = Tracker::open(query, costs);
    let mut payload = query.len() as u64;

    for (position, (stage, tool, is_llm)) in PIPELINE.iter().enumerate() {
        let handle = tracker.begin_stage(*stage);
        let started_at = Utc::now();
        let latency = Duration::milliseconds(rng.gen_range(40..1500));
        let output = if *is_llm {
            rng.gen_range(200..4000)
        } else {
            payload
        };

        let mut call = ToolCall::new(*tool, started_at, started_at + latency)
            .with_sizes(payload, output);
        call = if *is_llm {
            call.with_provider(llm_provider)
                .with_tokens(payload.div_ceil(4) + 150, output.div_ceil(4))
        } else if position == 0 {
            call.with_tokens(0, 0).with_audio_seconds(rng.gen_range(2.0..20.0))
        } else {
            call.with_tokens(0, 0)
        };

        if fail_at == Some(position) {
            let message = format!("{stage} agent failed");
            tracker.record_tool(&handle, call.failed(message.clone()));
            tracker.end_stage(&handle, false, Some(message.clone()));
            return tracker.close(false, Some(message));
        }

        tracker.record_tool(&handle, call);
        tracker.end_stage(&handle, true, None);
        payload = output;
    }

    tracker.close(true, None)
}
