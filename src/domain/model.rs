//! Model registry entry shape, with regions, tiering, provisioned
//! throughput and quality scores.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::Capability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Standard,
    Premium,
}

impl Tier {
    /// Matches the `rate_limits.tiers` config key for this tier.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Active,
    Deprecated,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProvisionedThroughput {
    pub enabled: bool,
    pub units: u32,
    pub hourly_cost_cents: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyEstimates {
    pub p50_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerMillionPrices {
    pub input_cents: f64,
    pub output_cents: f64,
    pub cached_input_cents: f64,
}

/// A registry entry. One per (model, provider); regions are an ordered
/// list of deployment locations the same model/provider pair is reachable
/// from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub model_id: String,
    pub provider_id: String,
    pub capabilities: HashSet<Capability>,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub prices: PerMillionPrices,
    pub rate_limits: RateLimits,
    pub latency: LatencyEstimates,
    pub tier: Tier,
    pub status: ModelStatus,
    /// Ordered by operator preference; first usable (circuit not OPEN) wins.
    pub regions: Vec<String>,
    pub provisioned_throughput: ProvisionedThroughput,
    pub quality_scores: HashMap<String, f64>,
    pub pricing_last_updated: DateTime<Utc>,
}

impl ModelDefinition {
    /// Marginal cost used for routing purposes; zero when on provisioned
    /// capacity.
    pub fn effective_cost_per_million(&self) -> f64 {
        if self.provisioned_throughput.enabled {
            0.0
        } else {
            self.prices.input_cents + self.prices.output_cents
        }
    }

    pub fn quality_score(&self, task_type: &str) -> f64 {
        *self.quality_scores.get(task_type).unwrap_or(&0.5)
    }

    pub fn has_capacity_hint(&self) -> bool {
        self.provisioned_throughput.enabled
    }
}
