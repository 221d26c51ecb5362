//! Rate-limit bucket state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::Tier;

/// State for key `ratelimit:{principal}:{model_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    pub tokens_remaining: f64,
    pub requests_remaining: f64,
    pub last_refill: DateTime<Utc>,
    pub tier: Tier,
    pub window_start: DateTime<Utc>,
}

impl RateLimitState {
    pub fn new(now: DateTime<Utc>, tier: Tier, rpm: f64, tpm: f64) -> Self {
        Self {
            tokens_remaining: tpm,
            requests_remaining: rpm,
            last_refill: now,
            tier,
            window_start: now,
        }
    }

    /// Bucket capacity is bounded by `capacity * burst_multiplier`.
    pub fn clamp(&mut self, rpm_cap: f64, tpm_cap: f64, burst_multiplier: f64) {
        self.requests_remaining = self.requests_remaining.min(rpm_cap * burst_multiplier);
        self.tokens_remaining = self.tokens_remaining.min(tpm_cap * burst_multiplier);
    }
}
