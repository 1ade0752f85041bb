//! Cost model for tool calls
//!
//! Converts token usage or audio duration into money using a pricing table
//! keyed by provider/model id. Unknown providers price at zero; a lookup
//! miss never fails the request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tracker::ToolCall;
use crate::config::PricingConfig;
use crate::models::{round_div, TokenSource, Usd};

/// Characters per token used when a call reports no usage
pub const CHARS_PER_TOKEN: u64 = 4;

/// How a provider bills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PricingUnit {
    /// Billed per input/output token
    #[default]
    PerToken,
    /// Billed per minute of audio
    PerMinute,
}

/// Pricing information for a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelPricing {
    /// Billing unit
    pub unit: PricingUnit,
    /// Cost per million input tokens
    pub input_per_million: Usd,
    /// Cost per million output tokens
    pub output_per_million: Usd,
    /// Cost per minute of audio
    pub per_minute: Usd,
}

/// Entry used for providers missing from the table
static FREE: ModelPricing = ModelPricing {
    unit: PricingUnit::PerToken,
    input_per_million: Usd::ZERO,
    output_per_million: Usd::ZERO,
    per_minute: Usd::ZERO,
};

impl ModelPricing {
    /// Token-priced entry, prices in dollars per million tokens
    pub fn per_token(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            unit: PricingUnit::PerToken,
            input_per_million: Usd::from_dollars(input_per_million),
            output_per_million: Usd::from_dollars(output_per_million),
            per_minute: Usd::ZERO,
        }
    }

    /// Duration-priced entry, price in dollars per minute
    pub fn per_minute(per_minute: f64) -> Self {
        Self {
            unit: PricingUnit::PerMinute,
            per_minute: Usd::from_dollars(per_minute),
            ..Self::default()
        }
    }
}

/// Token counts priced by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input (prompt) tokens
    pub input_tokens: u64,
    /// Output (completion) tokens
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Usage from an input/output split
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Estimate usage from payload character counts
    pub fn estimate(input_size: u64, output_size: u64) -> Self {
        Self {
            input_tokens: input_size.div_ceil(CHARS_PER_TOKEN),
            output_tokens: output_size.div_ceil(CHARS_PER_TOKEN),
        }
    }
}

/// Usage and cost resolved for one tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedUsage {
    /// Tokens attributed to the call
    pub usage: TokenUsage,
    /// Reported or estimated
    pub source: TokenSource,
    /// Cost of the call
    pub cost: Usd,
}

/// Cost model with provider pricing table
#[derive(Debug, Clone)]
pub struct CostModel {
    pricing: HashMap<String, ModelPricing>,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CostModel {
    /// Create a cost model with the built-in pricing table
    pub fn new() -> Self {
        let mut pricing = HashMap::new();

        // Language models (per million tokens)
        pricing.insert(
            "gemini-2.0-flash-exp".to_string(),
            ModelPricing::per_token(0.0, 0.0),
        );
        pricing.insert(
            "llama-3.3-70b-versatile".to_string(),
            ModelPricing::per_token(0.59, 0.79),
        );

        // Speech recognition (per minute of audio)
        pricing.insert(
            "google_stt_enhanced".to_string(),
            ModelPricing::per_minute(0.009),
        );
        pricing.insert("web_speech_api".to_string(), ModelPricing::per_minute(0.0));

        Self { pricing }
    }

    /// Create a cost model with an empty table; everything prices at zero
    pub fn empty() -> Self {
        Self {
            pricing: HashMap::new(),
        }
    }

    /// Build from configuration, layering configured entries over the
    /// built-in table unless defaults are disabled
    pub fn from_config(config: &PricingConfig) -> Self {
        let mut model = if config.include_defaults {
            Self::new()
        } else {
            Self::empty()
        };
        for (provider, pricing) in &config.models {
            model.set_pricing(provider.clone(), pricing.clone());
        }
        model
    }

    /// Add or update pricing for a provider
    pub fn set_pricing(&mut self, provider: impl Into<String>, pricing: ModelPricing) {
        self.pricing.insert(provider.into(), pricing);
    }

    /// Get pricing for a provider, if the table knows it
    pub fn get_pricing(&self, provider_id: &str) -> Option<&ModelPricing> {
        self.find_pricing(provider_id)
    }

    /// Number of entries in the table
    pub fn len(&self) -> usize {
        self.pricing.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.pricing.is_empty()
    }

    /// Find pricing by exact id, then by the longest table key contained
    /// in the id (case-insensitive), e.g. "groq/llama-3.3-70b-versatile"
    fn find_pricing(&self, provider_id: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.pricing.get(provider_id) {
            return Some(pricing);
        }

        let needle = provider_id.to_lowercase();
        self.pricing
            .iter()
            .filter(|(key, _)| !key.is_empty() && needle.contains(&key.to_lowercase()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, pricing)| pricing)
    }

    fn resolve(&self, provider_id: &str) -> &ModelPricing {
        self.find_pricing(provider_id).unwrap_or_else(|| {
            debug!(provider = provider_id, "Unknown provider, pricing at zero");
            &FREE
        })
    }

    /// Cost of a token-priced call. Per-minute providers price at zero here.
    pub fn price_for(&self, provider_id: &str, input_tokens: u64, output_tokens: u64) -> Usd {
        let pricing = self.resolve(provider_id);
        if pricing.unit != PricingUnit::PerToken {
            return Usd::ZERO;
        }

        let nanos = i128::from(input_tokens) * i128::from(pricing.input_per_million.as_nanos())
            + i128::from(output_tokens) * i128::from(pricing.output_per_million.as_nanos());
        Usd::from_nanos(round_div(nanos, 1_000_000))
    }

    /// Cost of a duration-priced call. Token providers price at zero here.
    pub fn price_for_duration(&self, provider_id: &str, seconds: f64) -> Usd {
        let pricing = self.resolve(provider_id);
        if pricing.unit != PricingUnit::PerMinute || !seconds.is_finite() || seconds <= 0.0 {
            return Usd::ZERO;
        }

        let millis = (seconds * 1000.0).round() as u64;
        pricing.per_minute.scaled(millis, 60_000)
    }

    /// Resolve usage and cost for a tool call, choosing the pricing
    /// function by the provider's billing unit
    pub fn price_tool(&self, call: &ToolCall) -> PricedUsage {
        let (usage, source) = match call.usage {
            Some(usage) => (usage, TokenSource::Reported),
            None => (
                TokenUsage::estimate(call.input_size, call.output_size),
                TokenSource::Estimated,
            ),
        };

        let provider = call.pricing_key();
        let cost = match self.resolve(provider).unit {
            PricingUnit::PerToken => {
                self.price_for(provider, usage.input_tokens, usage.output_tokens)
            }
            PricingUnit::PerMinute => {
                let seconds = call.audio_seconds.unwrap_or_else(|| call.duration_seconds());
                self.price_for_duration(provider, seconds)
            }
        };

        PricedUsage {
            usage,
            source,
            cost,
        }
    }
}
