//! Cache entry shape shared by the exact and semantic cache layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::response::{Choice, Usage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 over the canonical serialization of the logical prompt.
    pub cache_key: String,
    /// Present only for entries written through the semantic layer.
    pub embedding: Option<Vec<f32>>,
    pub category: Option<String>,
    pub provider_id: String,
    pub model_id: String,
    pub choice: Choice,
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Entries with an embedding participate in semantic search; entries
    /// without one only match by exact key.
    pub fn participates_in_semantic_search(&self) -> bool {
        self.embedding.is_some()
    }
}
