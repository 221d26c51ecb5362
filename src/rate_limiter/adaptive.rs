//! Adaptive rate-limit factor.
//!
//! Keyed by `(provider, region)`, the finer-grained key a production
//! deployment wants, with a provider-wide accessor that aggregates by
//! taking the minimum factor across that provider's known regions for
//! callers that don't yet have
//! a region to key on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

const MIN_FACTOR: f64 = 0.1;
const MAX_FACTOR: f64 = 1.0;
const DECAY_MULTIPLIER: f64 = 0.5;
const RECOVERY_STEP: f64 = 0.05;
const RECOVERY_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct FactorState {
    current_factor: f64,
    last_429_at: Option<DateTime<Utc>>,
    last_recovery_at: DateTime<Utc>,
}

impl Default for FactorState {
    fn default() -> Self {
        Self {
            current_factor: MAX_FACTOR,
            last_429_at: None,
            last_recovery_at: Utc::now(),
        }
    }
}

pub struct AdaptiveFactor {
    states: RwLock<HashMap<(String, String), FactorState>>,
}

impl AdaptiveFactor {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    fn key(provider_id: &str, region: &str) -> (String, String) {
        (provider_id.to_string(), region.to_string())
    }

    /// Reads the current factor, applying any recovery ticks owed since
    /// the last read (lazily, rather than via a separate background task,
    /// so tests don't need to drive a real clock).
    pub async fn factor_for(&self, provider_id: &str, region: &str) -> f64 {
        let key = Self::key(provider_id, region);
        let mut states = self.states.write().await;
        let state = states.entry(key).or_default();
        Self::apply_recovery(state);
        state.current_factor
    }

    /// Provider-wide view: the minimum factor across all regions this
    /// provider has recorded state for. Absent any recorded state, the
    /// provider is assumed healthy (1.0).
    pub async fn factor_for_provider(&self, provider_id: &str) -> f64 {
        let states = self.states.read().await;
        states
            .iter()
            .filter(|((p, _), _)| p == provider_id)
            .map(|(_, s)| s.current_factor)
            .fold(MAX_FACTOR, f64::min)
    }

    /// Record a 429: halve the factor (floored at `MIN_FACTOR`).
    pub async fn record_429(&self, provider_id: &str, region: &str) {
        let key = Self::key(provider_id, region);
        let mut states = self.states.write().await;
        let state = states.entry(key).or_default();
        state.current_factor = (state.current_factor * DECAY_MULTIPLIER).max(MIN_FACTOR);
        state.last_429_at = Some(Utc::now());
        state.last_recovery_at = Utc::now();
    }

    fn apply_recovery(state: &mut FactorState) {
        let now = Utc::now();
        let elapsed_secs = (now - state.last_recovery_at).num_seconds();
        if elapsed_secs < RECOVERY_INTERVAL_SECS {
            return;
        }
        let ticks = elapsed_secs / RECOVERY_INTERVAL_SECS;
        state.current_factor = (state.current_factor + RECOVERY_STEP * ticks as f64).min(MAX_FACTOR);
        state.last_recovery_at = now;
    }
}

impl Default for AdaptiveFactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_at_full_factor() {
        let adaptive = AdaptiveFactor::new();
        assert_eq!(adaptive.factor_for("openai", "us-east-1").await, 1.0);
    }

    #[tokio::test]
    async fn record_429_halves_and_floors_factor() {
        let adaptive = AdaptiveFactor::new();
        adaptive.record_429("openai", "us-east-1").await;
        assert_eq!(adaptive.factor_for("openai", "us-east-1").await, 0.5);
        for _ in 0..5 {
            adaptive.record_429("openai", "us-east-1").await;
        }
        assert_eq!(adaptive.factor_for("openai", "us-east-1").await, MIN_FACTOR);
    }

    #[tokio::test]
    async fn provider_wide_factor_is_minimum_across_regions() {
        let adaptive = AdaptiveFactor::new();
        adaptive.record_429("openai", "us-east-1").await;
        let _ = adaptive.factor_for("openai", "eu-west-1").await;
        let provider_factor = adaptive.factor_for_provider("openai").await;
        assert_eq!(provider_factor, 0.5);
    }

    #[tokio::test]
    async fn unrecorded_provider_defaults_to_healthy() {
        let adaptive = AdaptiveFactor::new();
        assert_eq!(adaptive.factor_for_provider("never-seen").await, 1.0);
    }
}
