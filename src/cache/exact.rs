//! Exact-match cache layer.
//!
//! Key = SHA-256 over the canonical serialization of the logical prompt.
//! Backed by `moka`'s async cache with a per-entry `Expiry` implementation
//! since TTL is category-configurable rather than a single cache-wide
//! duration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;
use sha2::{Digest, Sha256};

use crate::domain::{CacheEntry, LogicalPrompt};

use super::CacheErrorKind;

struct PerEntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        let now = Utc::now();
        let remaining = (value.expires_at - now).num_milliseconds();
        Some(Duration::from_millis(remaining.max(0) as u64))
    }
}

pub fn cache_key(prompt: &LogicalPrompt) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.canonical_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ExactCache {
    inner: Cache<String, Arc<CacheEntry>>,
}

impl ExactCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryExpiry)
            .build();
        Self { inner }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.inner.get(key).await?;
        if entry.is_expired(Utc::now()) {
            self.inner.invalidate(key).await;
            return None;
        }
        Some(entry)
    }

    /// Best-effort write: a failure to insert never fails the request.
    pub async fn put(&self, entry: CacheEntry) -> Result<(), CacheErrorKind> {
        if entry.expires_at <= entry.created_at {
            return Err(CacheErrorKind::WriteFailed("expires_at must be after created_at".into()));
        }
        self.inner.insert(entry.cache_key.clone(), Arc::new(entry)).await;
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Invalidate by prefix (e.g. model_id, agent_did) -- moka has no
    /// native prefix scan, so this walks the current key set.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let keys: Vec<String> = self
            .inner
            .iter()
            .map(|(k, _)| (*k).clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in keys {
            self.inner.invalidate(&key).await;
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Choice, FinishReason, Role, Usage};
    use chrono::Duration as ChronoDuration;

    fn sample_entry(key: &str, ttl_secs: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            cache_key: key.to_string(),
            embedding: None,
            category: None,
            provider_id: "anthropic".into(),
            model_id: "claude-haiku".into(),
            choice: Choice {
                content: "hello".into(),
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason: FinishReason::Stop,
            },
            usage: Usage::default(),
            created_at: now,
            expires_at: now + ChronoDuration::seconds(ttl_secs),
            hit_count: 0,
        }
    }

    #[test]
    fn cache_key_is_deterministic_for_identical_prompts() {
        let prompt = LogicalPrompt {
            system_message: Some("be terse".into()),
            messages: vec![crate::domain::Message {
                role: Role::User,
                content: "hi".into(),
            }],
            tools: Vec::new(),
            output_schema: None,
        };
        assert_eq!(cache_key(&prompt), cache_key(&prompt));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = ExactCache::new(100);
        cache.put(sample_entry("k1", 3600)).await.unwrap();
        let got = cache.get("k1").await;
        assert!(got.is_some());
        assert_eq!(got.unwrap().choice.content, "hello");
    }

    #[tokio::test]
    async fn rejects_entry_with_non_positive_ttl() {
        let cache = ExactCache::new(100);
        let result = cache.put(sample_entry("k2", -1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn invalidate_prefix_removes_matching_keys() {
        let cache = ExactCache::new(100);
        cache.put(sample_entry("model:gpt-4o:aaa", 3600)).await.unwrap();
        cache.put(sample_entry("model:claude:bbb", 3600)).await.unwrap();
        cache.invalidate_prefix("model:gpt-4o").await;
        cache.inner.run_pending_tasks().await;
        assert!(cache.get("model:gpt-4o:aaa").await.is_none());
        assert!(cache.get("model:claude:bbb").await.is_some());
    }
}
