//! Event/audit emission.
//!
//! Aimed at the gateway's own append-only audit contract rather than at
//! the caller-facing stream. The event sink is an external collaborator
//! behind the `EventEmitter` trait; `TracingEventEmitter` is the minimal
//! stand-in that routes events through `tracing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The enumerated `event_type` values the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ModelRequestSubmitted,
    ModelRequestRouted,
    ModelResponseReceived,
    ModelCacheHit,
    ModelCacheMiss,
    ModelRateLimited,
    ModelBudgetExhausted,
    ModelProviderFailed,
    ModelCircuitOpened,
    ModelCircuitClosed,
    ModelCostIncurred,
    RequestCancelled,
    SecurityAuthFreeze,
    SecurityBlockTriggered,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ModelRequestSubmitted => "model.request.submitted",
            EventType::ModelRequestRouted => "model.request.routed",
            EventType::ModelResponseReceived => "model.response.received",
            EventType::ModelCacheHit => "model.cache.hit",
            EventType::ModelCacheMiss => "model.cache.miss",
            EventType::ModelRateLimited => "model.rate.limited",
            EventType::ModelBudgetExhausted => "model.budget.exhausted",
            EventType::ModelProviderFailed => "model.provider.failed",
            EventType::ModelCircuitOpened => "model.circuit.opened",
            EventType::ModelCircuitClosed => "model.circuit.closed",
            EventType::ModelCostIncurred => "model.cost.incurred",
            EventType::RequestCancelled => "request.cancelled",
            EventType::SecurityAuthFreeze => "security.auth_freeze",
            EventType::SecurityBlockTriggered => "security.block_triggered",
        }
    }
}

/// Every event carries event_id, event_type, timestamp, version,
/// correlation_id (= request_id), and a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub correlation_id: String,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        correlation_id: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.as_str(),
            timestamp: now,
            version: 1,
            correlation_id: correlation_id.into(),
            payload,
        }
    }
}

/// At-least-once delivery; consumers must be idempotent on `event_id`.
/// Implementations must never block the pipeline on a slow sink; errors
/// are swallowed with a warning.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Minimal stand-in sink: serializes to JSON and logs at `info` under a
/// dedicated target, so the emission contract is exercised end-to-end
/// without depending on a real audit backend.
pub struct TracingEventEmitter;

#[async_trait]
impl EventEmitter for TracingEventEmitter {
    async fn emit(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "gateway.events", "{json}"),
            Err(e) => tracing::warn!("failed to serialize event {}: {e}", event.event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings_match_schema() {
        assert_eq!(EventType::ModelCacheHit.as_str(), "model.cache.hit");
        assert_eq!(
            EventType::ModelBudgetExhausted.as_str(),
            "model.budget.exhausted"
        );
    }

    #[tokio::test]
    async fn tracing_emitter_never_panics_on_emit() {
        let emitter = TracingEventEmitter;
        let event = Event::new(
            EventType::ModelCacheHit,
            "req-1",
            serde_json::json!({"cache_type": "exact"}),
            Utc::now(),
        );
        emitter.emit(event).await;
    }
}
