//! Circuit breaker state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// State per (provider, region).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub failure_count: u32,
    /// Relevant only in `HalfOpen`.
    pub success_count: u32,
    /// Probe requests currently admitted and not yet resolved. Relevant
    /// only in `HalfOpen`; reset to 0 on every state transition.
    pub half_open_in_flight: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    pub next_retry_time: Option<DateTime<Utc>>,
}

impl CircuitState {
    pub fn closed(now: DateTime<Utc>) -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_in_flight: 0,
            last_failure_time: None,
            last_success_time: None,
            state_changed_at: now,
            next_retry_time: None,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => true,
            CircuitStatus::Open => self
                .next_retry_time
                .map(|retry_at| now >= retry_at)
                .unwrap_or(false),
        }
    }
}
