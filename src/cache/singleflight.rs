//! Concurrent-miss coordination.
//!
//! A single-flight map keyed by the exact cache key ensures at most one
//! in-flight provider call per key; other concurrent requests subscribe
//! to its result instead of issuing their own. `dashmap` supplies the
//! concurrent map, the same as the registry and rate limiter use elsewhere
//! in this crate.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::domain::{Choice, Usage};
use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct FlightResult {
    pub choice: Choice,
    pub usage: Usage,
}

type Broadcaster = broadcast::Sender<Result<FlightResult, String>>;

#[derive(Default)]
pub struct SingleFlight {
    inflight: DashMap<String, Broadcaster>,
}

pub enum FlightRole {
    /// This caller is the leader: it must compute the value and call
    /// `complete`/`fail` when done.
    Leader,
    /// This caller should await the given receiver instead of computing
    /// anything itself.
    Follower(broadcast::Receiver<Result<FlightResult, String>>),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Join or start a flight for `key`. Exactly one caller per key
    /// observes `FlightRole::Leader`; everyone else gets a `Follower`
    /// subscribed to that leader's eventual result.
    pub fn join(&self, key: &str) -> FlightRole {
        if let Some(tx) = self.inflight.get(key) {
            return FlightRole::Follower(tx.subscribe());
        }

        let (tx, _rx) = broadcast::channel(1);
        match self.inflight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                FlightRole::Follower(existing.get().subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(tx);
                FlightRole::Leader
            }
        }
    }

    pub fn complete(&self, key: &str, result: FlightResult) {
        if let Some((_, tx)) = self.inflight.remove(key) {
            let _ = tx.send(Ok(result));
        }
    }

    pub fn fail(&self, key: &str, message: String) {
        if let Some((_, tx)) = self.inflight.remove(key) {
            let _ = tx.send(Err(message));
        }
    }

    /// Await a follower's subscription, bounded by the caller's remaining
    /// deadline.
    pub async fn await_follower(
        mut rx: broadcast::Receiver<Result<FlightResult, String>>,
        timeout: std::time::Duration,
    ) -> Result<FlightResult, GatewayError> {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(GatewayError::ProviderTransient(message)),
            Ok(Err(_)) => Err(GatewayError::Internal("single-flight leader dropped without a result".into())),
            Err(_) => Err(GatewayError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FinishReason;
    use std::time::Duration;

    fn sample_result() -> FlightResult {
        FlightResult {
            choice: Choice {
                content: "hi".into(),
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason: FinishReason::Stop,
            },
            usage: Usage::default(),
        }
    }

    #[test]
    fn first_joiner_is_leader_second_is_follower() {
        let flight = SingleFlight::new();
        assert!(matches!(flight.join("k1"), FlightRole::Leader));
        assert!(matches!(flight.join("k1"), FlightRole::Follower(_)));
    }

    #[tokio::test]
    async fn follower_receives_leader_completion() {
        let flight = Arc::new(SingleFlight::new());
        let leader_role = flight.join("k1");
        assert!(matches!(leader_role, FlightRole::Leader));

        let follower_role = flight.join("k1");
        let rx = match follower_role {
            FlightRole::Follower(rx) => rx,
            _ => panic!("expected follower"),
        };

        flight.complete("k1", sample_result());

        let result = SingleFlight::await_follower(rx, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn follower_times_out_if_leader_never_completes() {
        let flight = SingleFlight::new();
        let _leader_role = flight.join("k1");
        let follower_role = flight.join("k1");
        let rx = match follower_role {
            FlightRole::Follower(rx) => rx,
            _ => panic!("expected follower"),
        };

        let result = SingleFlight::await_follower(rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(GatewayError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn key_is_free_for_a_new_flight_after_completion() {
        let flight = SingleFlight::new();
        let _ = flight.join("k1");
        flight.complete("k1", sample_result());
        assert!(matches!(flight.join("k1"), FlightRole::Leader));
    }
}
