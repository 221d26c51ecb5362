//! Auth-failure limiter.
//!
//! Authorization failures are rate-limited independently of the model
//! token bucket and enforced before model dispatch: 10 per principal per
//! minute triggers a 5-minute freeze; 100 per source identifier per
//! minute triggers a 15-minute block.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

const PRINCIPAL_THRESHOLD: u32 = 10;
const PRINCIPAL_FREEZE_MINUTES: i64 = 5;
const SOURCE_THRESHOLD: u32 = 100;
const SOURCE_BLOCK_MINUTES: i64 = 15;
const WINDOW_MINUTES: i64 = 1;

struct Counter {
    count: u32,
    window_start: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
}

impl Counter {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            blocked_until: None,
        }
    }
}

pub struct AuthFailureLimiter {
    principals: RwLock<HashMap<String, Counter>>,
    sources: RwLock<HashMap<String, Counter>>,
}

impl AuthFailureLimiter {
    pub fn new() -> Self {
        Self {
            principals: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Is this principal currently frozen, or this source currently
    /// blocked? Checked before dispatch.
    pub async fn is_blocked(&self, principal_id: &str, source_id: &str) -> bool {
        let now = Utc::now();
        let principal_blocked = self
            .principals
            .read()
            .await
            .get(principal_id)
            .and_then(|c| c.blocked_until)
            .map(|until| now < until)
            .unwrap_or(false);
        let source_blocked = self
            .sources
            .read()
            .await
            .get(source_id)
            .and_then(|c| c.blocked_until)
            .map(|until| now < until)
            .unwrap_or(false);
        principal_blocked || source_blocked
    }

    /// Record an authorization failure; returns true if this record just
    /// triggered a new freeze/block (for event emission).
    pub async fn record_failure(&self, principal_id: &str, source_id: &str) -> bool {
        let principal_triggered = Self::bump(
            &self.principals,
            principal_id,
            PRINCIPAL_THRESHOLD,
            PRINCIPAL_FREEZE_MINUTES,
        )
        .await;
        let source_triggered = Self::bump(&self.sources, source_id, SOURCE_THRESHOLD, SOURCE_BLOCK_MINUTES).await;
        principal_triggered || source_triggered
    }

    async fn bump(map: &RwLock<HashMap<String, Counter>>, key: &str, threshold: u32, block_minutes: i64) -> bool {
        let now = Utc::now();
        let mut guard = map.write().await;
        let counter = guard.entry(key.to_string()).or_insert_with(|| Counter::new(now));

        if (now - counter.window_start) >= Duration::minutes(WINDOW_MINUTES) {
            counter.count = 0;
            counter.window_start = now;
        }

        counter.count += 1;

        if counter.count >= threshold && counter.blocked_until.is_none() {
            counter.blocked_until = Some(now + Duration::minutes(block_minutes));
            return true;
        }
        false
    }
}

impl Default for AuthFailureLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tenth_failure_freezes_the_principal() {
        let limiter = AuthFailureLimiter::new();
        let mut triggered = false;
        for _ in 0..PRINCIPAL_THRESHOLD {
            triggered = limiter.record_failure("principal-1", "source-a").await;
        }
        assert!(triggered);
        assert!(limiter.is_blocked("principal-1", "other-source").await);
    }

    #[tokio::test]
    async fn below_threshold_does_not_block() {
        let limiter = AuthFailureLimiter::new();
        for _ in 0..PRINCIPAL_THRESHOLD - 1 {
            limiter.record_failure("principal-2", "source-b").await;
        }
        assert!(!limiter.is_blocked("principal-2", "source-b").await);
    }

    #[tokio::test]
    async fn unrelated_principal_is_unaffected() {
        let limiter = AuthFailureLimiter::new();
        for _ in 0..PRINCIPAL_THRESHOLD {
            limiter.record_failure("principal-3", "source-c").await;
        }
        assert!(!limiter.is_blocked("principal-4", "source-d").await);
    }
}
