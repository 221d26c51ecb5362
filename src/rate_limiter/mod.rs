//! Rate Limiter.
//!
//! Token bucket per key `ratelimit:{principal}:{model_id}`; a parallel
//! bucket tracks tokens-per-minute alongside the requests-per-minute
//! bucket. The read-modify-write is made atomic with a per-key `Mutex`
//! guarding the bucket state in a `dashmap`, rather than reaching for a
//! distributed CAS store -- local-only limiters are acceptable for a
//! single-instance deployment.

pub mod adaptive;
pub mod auth_limiter;

pub use adaptive::AdaptiveFactor;
pub use auth_limiter::AuthFailureLimiter;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::{RateLimitState, Tier};
use crate::error::GatewayError;

fn bucket_key(principal_id: &str, model_id: &str) -> String {
    format!("ratelimit:{principal_id}:{model_id}")
}

pub struct RateLimiter {
    buckets: DashMap<String, Mutex<RateLimitState>>,
    adaptive: AdaptiveFactor,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            adaptive: AdaptiveFactor::new(),
        }
    }

    pub fn adaptive(&self) -> &AdaptiveFactor {
        &self.adaptive
    }

    fn refill(state: &mut RateLimitState, rpm: f64, tpm: f64) {
        let now = Utc::now();
        let elapsed_secs = (now - state.last_refill).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs <= 0.0 {
            return;
        }
        let request_refill = (rpm / 60.0) * elapsed_secs;
        let token_refill = (tpm / 60.0) * elapsed_secs;
        state.requests_remaining += request_refill;
        state.tokens_remaining += token_refill;
        state.last_refill = now;
    }

    /// Atomic acquire: refill, clamp to the tier's burst ceiling, then
    /// attempt to debit one request token and `estimated_tokens` input
    /// tokens. `base_rpm`/`base_tpm` are scaled by the provider/region
    /// adaptive factor before being applied; `burst_multiplier` bounds how
    /// far unused capacity may accumulate above the base rate.
    #[allow(clippy::too_many_arguments)]
    pub async fn acquire(
        &self,
        principal_id: &str,
        model_id: &str,
        tier: Tier,
        base_rpm: f64,
        base_tpm: f64,
        burst_multiplier: f64,
        provider_id: &str,
        region: &str,
        estimated_tokens: f64,
    ) -> Result<(), GatewayError> {
        let key = bucket_key(principal_id, model_id);
        let factor = self.adaptive.factor_for(provider_id, region).await;
        let rpm = base_rpm * factor;
        let tpm = base_tpm * factor;

        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| Mutex::new(RateLimitState::new(Utc::now(), tier, rpm, tpm)));
        let mut state = entry.lock().await;

        Self::refill(&mut state, rpm, tpm);
        state.clamp(rpm, tpm, burst_multiplier);

        if state.requests_remaining < 1.0 || state.tokens_remaining < estimated_tokens {
            let request_deficit = (1.0 - state.requests_remaining).max(0.0);
            let token_deficit = (estimated_tokens - state.tokens_remaining).max(0.0);
            let request_refill_rate = (rpm / 60.0).max(f64::EPSILON);
            let token_refill_rate = (tpm / 60.0).max(f64::EPSILON);
            let retry_after_secs = (request_deficit / request_refill_rate).max(token_deficit / token_refill_rate);
            return Err(GatewayError::RateLimited {
                retry_after_ms: Some((retry_after_secs * 1000.0).ceil() as u64),
            });
        }

        state.requests_remaining -= 1.0;
        state.tokens_remaining -= estimated_tokens;
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_capacity() {
        let limiter = RateLimiter::new();
        let result = limiter
            .acquire("p1", "gpt-4o", Tier::Standard, 60.0, 100_000.0, 1.0, "openai", "us-east-1", 500.0)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn acquire_fails_once_request_bucket_is_drained() {
        let limiter = RateLimiter::new();
        for _ in 0..2 {
            let _ = limiter
                .acquire("p1", "gpt-4o", Tier::Standard, 2.0, 100_000.0, 1.0, "openai", "us-east-1", 10.0)
                .await;
        }
        let result = limiter
            .acquire("p1", "gpt-4o", Tier::Standard, 2.0, 100_000.0, 1.0, "openai", "us-east-1", 10.0)
            .await;
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_share_buckets() {
        let limiter = RateLimiter::new();
        let a = limiter
            .acquire("p1", "gpt-4o", Tier::Standard, 1.0, 100.0, 1.0, "openai", "us-east-1", 10.0)
            .await;
        let b = limiter
            .acquire("p2", "gpt-4o", Tier::Standard, 1.0, 100.0, 1.0, "openai", "us-east-1", 10.0)
            .await;
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn burst_multiplier_bounds_accumulated_capacity() {
        let limiter = RateLimiter::new();
        // Seed the bucket, then manually age it by a full minute so refill
        // would overshoot the base rpm if clamp weren't applied.
        let _ = limiter
            .acquire("p1", "gpt-4o", Tier::Standard, 10.0, 1_000.0, 1.5, "openai", "us-east-1", 1.0)
            .await;
        {
            let key = bucket_key("p1", "gpt-4o");
            let entry = limiter.buckets.get(&key).unwrap();
            let mut state = entry.lock().await;
            state.last_refill = Utc::now() - chrono::Duration::seconds(120);
        }
        let _ = limiter
            .acquire("p1", "gpt-4o", Tier::Standard, 10.0, 1_000.0, 1.5, "openai", "us-east-1", 1.0)
            .await;
        let key = bucket_key("p1", "gpt-4o");
        let entry = limiter.buckets.get(&key).unwrap();
        let state = entry.lock().await;
        assert!(state.requests_remaining <= 10.0 * 1.5);
    }
}
