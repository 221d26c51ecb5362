//! Circuit Breaker. State per (provider, region).

pub mod probe;

pub use probe::ProbeLoop;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::adapters::AdapterError;
use crate::domain::{CircuitState, CircuitStatus};
use crate::error::GatewayError;
use crate::events::{Event, EventEmitter, EventType};

#[derive(Debug, Clone, Copy)]
pub struct CircuitParams {
    pub failure_threshold: u32,
    pub cooldown_seconds: i64,
    pub success_threshold: u32,
    /// Max concurrent probe requests admitted while `HalfOpen`.
    pub half_open_test_requests: u32,
}

impl Default for CircuitParams {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 60,
            success_threshold: 3,
            half_open_test_requests: 1,
        }
    }
}

fn is_monitored(error: &AdapterError) -> bool {
    matches!(
        error,
        AdapterError::RateLimited { .. } | AdapterError::Transient(_) | AdapterError::Timeout
    )
}

pub struct CircuitBreaker {
    states: DashMap<(String, String), Mutex<CircuitState>>,
    params: CircuitParams,
    emitter: std::sync::Arc<dyn EventEmitter>,
}

impl CircuitBreaker {
    pub fn new(params: CircuitParams, emitter: std::sync::Arc<dyn EventEmitter>) -> Self {
        Self {
            states: DashMap::new(),
            params,
            emitter,
        }
    }

    fn key(provider_id: &str, region: &str) -> (String, String) {
        (provider_id.to_string(), region.to_string())
    }

    /// Whether a request may currently be attempted against this
    /// (provider, region). OPEN transitions to HALF_OPEN as a side
    /// effect of the elapsed-cooldown check, matching the
    /// "on elapse, transition to HALF_OPEN" wording. HALF_OPEN admits at
    /// most `half_open_test_requests` concurrently; the caller that wins
    /// an admitted slot must resolve it via `record_success`/
    /// `record_failure`.
    pub async fn is_usable(&self, provider_id: &str, region: &str) -> Result<(), GatewayError> {
        let key = Self::key(provider_id, region);
        let entry = self
            .states
            .entry(key)
            .or_insert_with(|| Mutex::new(CircuitState::closed(Utc::now())));
        let mut state = entry.lock().await;

        if state.status == CircuitStatus::Open {
            let now = Utc::now();
            if state.is_usable(now) {
                state.status = CircuitStatus::HalfOpen;
                state.success_count = 0;
                state.half_open_in_flight = 0;
                state.state_changed_at = now;
            } else {
                return Err(GatewayError::CircuitOpen {
                    provider: provider_id.to_string(),
                    region: region.to_string(),
                });
            }
        }

        if state.status == CircuitStatus::HalfOpen {
            if state.half_open_in_flight >= self.params.half_open_test_requests {
                return Err(GatewayError::CircuitOpen {
                    provider: provider_id.to_string(),
                    region: region.to_string(),
                });
            }
            state.half_open_in_flight += 1;
        }

        Ok(())
    }

    pub async fn record_success(&self, provider_id: &str, region: &str) {
        let key = Self::key(provider_id, region);
        let entry = self
            .states
            .entry(key)
            .or_insert_with(|| Mutex::new(CircuitState::closed(Utc::now())));
        let mut state = entry.lock().await;
        let now = Utc::now();
        state.last_success_time = Some(now);

        match state.status {
            CircuitStatus::Closed => {
                state.failure_count = 0;
            }
            CircuitStatus::HalfOpen => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                state.success_count += 1;
                if state.success_count >= self.params.success_threshold {
                    state.status = CircuitStatus::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.half_open_in_flight = 0;
                    state.state_changed_at = now;
                }
            }
            CircuitStatus::Open => {}
        }
    }

    /// Record an outcome; only `AdapterError` classes in
    /// `monitored_error_classes` count toward the threshold.
    pub async fn record_failure(&self, provider_id: &str, region: &str, error: &AdapterError) {
        if !is_monitored(error) {
            return;
        }

        let key = Self::key(provider_id, region);
        let entry = self
            .states
            .entry(key)
            .or_insert_with(|| Mutex::new(CircuitState::closed(Utc::now())));
        let mut state = entry.lock().await;
        let now = Utc::now();
        state.last_failure_time = Some(now);

        match state.status {
            CircuitStatus::HalfOpen => {
                state.status = CircuitStatus::Open;
                state.half_open_in_flight = 0;
                state.state_changed_at = now;
                state.next_retry_time = Some(now + Duration::seconds(self.params.cooldown_seconds));
            }
            CircuitStatus::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.params.failure_threshold {
                    state.status = CircuitStatus::Open;
                    state.state_changed_at = now;
                    state.next_retry_time = Some(now + Duration::seconds(self.params.cooldown_seconds));
                    let failure_count = state.failure_count;
                    let cooldown = self.params.cooldown_seconds;
                    drop(state);
                    self.emitter
                        .emit(Event::new(
                            EventType::ModelCircuitOpened,
                            format!("{provider_id}:{region}"),
                            serde_json::json!({
                                "provider": provider_id,
                                "region": region,
                                "failure_count": failure_count,
                                "cooldown_seconds": cooldown,
                            }),
                            now,
                        ))
                        .await;
                }
            }
            CircuitStatus::Open => {}
        }
    }

    pub async fn snapshot(&self, provider_id: &str, region: &str) -> Option<CircuitState> {
        let key = Self::key(provider_id, region);
        let entry = self.states.get(&key)?;
        Some(entry.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingEventEmitter;
    use std::sync::Arc;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitParams {
                failure_threshold: 3,
                cooldown_seconds: 60,
                success_threshold: 3,
                half_open_test_requests: 1,
            },
            Arc::new(TracingEventEmitter),
        )
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker
                .record_failure("openai", "us-east-1", &AdapterError::Transient("boom".into()))
                .await;
        }
        let result = breaker.is_usable("openai", "us-east-1").await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let breaker = breaker();
        breaker
            .record_failure("openai", "us-east-1", &AdapterError::Transient("boom".into()))
            .await;
        breaker.record_success("openai", "us-east-1").await;
        let state = breaker.snapshot("openai", "us-east-1").await.unwrap();
        assert_eq!(state.failure_count, 0);
    }

    #[tokio::test]
    async fn unmonitored_error_does_not_count() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker
                .record_failure("openai", "us-east-1", &AdapterError::InvalidRequest("bad".into()))
                .await;
        }
        assert!(breaker.is_usable("openai", "us-east-1").await.is_ok());
    }

    #[tokio::test]
    async fn half_open_failure_reopens_with_fresh_cooldown() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker
                .record_failure("openai", "us-east-1", &AdapterError::Transient("boom".into()))
                .await;
        }
        {
            let key = CircuitBreaker::key("openai", "us-east-1");
            let entry = breaker.states.get(&key).unwrap();
            let mut state = entry.lock().await;
            state.next_retry_time = Some(Utc::now() - Duration::seconds(1));
        }
        assert!(breaker.is_usable("openai", "us-east-1").await.is_ok());
        let state = breaker.snapshot("openai", "us-east-1").await.unwrap();
        assert_eq!(state.status, CircuitStatus::HalfOpen);

        breaker
            .record_failure("openai", "us-east-1", &AdapterError::Transient("boom again".into()))
            .await;
        let result = breaker.is_usable("openai", "us-east-1").await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_admits_at_most_configured_in_flight() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker
                .record_failure("openai", "us-east-1", &AdapterError::Transient("boom".into()))
                .await;
        }
        {
            let key = CircuitBreaker::key("openai", "us-east-1");
            let entry = breaker.states.get(&key).unwrap();
            let mut state = entry.lock().await;
            state.next_retry_time = Some(Utc::now() - Duration::seconds(1));
        }

        assert!(breaker.is_usable("openai", "us-east-1").await.is_ok());
        let result = breaker.is_usable("openai", "us-east-1").await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));

        breaker.record_success("openai", "us-east-1").await;
        assert!(breaker.is_usable("openai", "us-east-1").await.is_ok());
    }
}
