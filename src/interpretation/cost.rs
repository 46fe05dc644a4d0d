use serde::{Deserialize, Serialize};

use crate::interpretation::types::UsageStats;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// USD rates per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_input_rate")]
    pub input_per_mtok: f64,
    #[serde(default = "default_output_rate")]
    pub output_per_mtok: f64,
    #[serde(default = "default_cache_write_rate")]
    pub cache_write_per_mtok: f64,
    #[serde(default = "default_cache_read_rate")]
    pub cache_read_per_mtok: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_mtok: default_input_rate(),
            output_per_mtok: default_output_rate(),
            cache_write_per_mtok: default_cache_write_rate(),
            cache_read_per_mtok: default_cache_read_rate(),
        }
    }
}

fn default_input_rate() -> f64 {
    3.0
}

fn default_output_rate() -> f64 {
    15.0
}

fn default_cache_write_rate() -> f64 {
    3.75
}

fn default_cache_read_rate() -> f64 {
    0.30
}

pub fn compute_cost(usage: &UsageStats, pricing: &PricingConfig) -> f64 {
    if usage.cache_read_tokens > usage.input_tokens {
        tracing::warn!(
            target: "provider",
            input_tokens = usage.input_tokens,
            cache_read_tokens = usage.cache_read_tokens,
            "cache_read_exceeds_input_tokens"
        );
    }

    let regular_input = usage.input_tokens.saturating_sub(usage.cache_read_tokens);
    millions(regular_input) * pricing.input_per_mtok
        + millions(usage.output_tokens) * pricing.output_per_mtok
        + millions(usage.cache_creation_tokens) * pricing.cache_write_per_mtok
        + millions(usage.cache_read_tokens) * pricing.cache_read_per_mtok
}

fn millions(tokens: u64) -> f64 {
    tokens as f64 / TOKENS_PER_UNIT
}
