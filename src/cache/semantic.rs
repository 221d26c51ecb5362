//! Semantic cache layer.
//!
//! Embedding generation is delegated to an `EmbeddingModel` implementation
//! distinct from the inference models being served; this module only owns
//! the similarity search and category-threshold matching over vectors
//! someone else produced. Storage is an in-process `dashmap` index
//! scanned linearly -- a brute-force shape reasonable for small corpora,
//! before an ANN index becomes necessary.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{CacheEntry, LogicalPrompt};

/// Thresholds by cache category; unnamed categories use `default`.
pub fn category_threshold(category: Option<&str>) -> f32 {
    match category {
        Some("factual_qa") => 0.92,
        Some("code_generation") => 0.88,
        Some("summarization") => 0.85,
        Some("creative_writing") => 0.75,
        _ => 0.85,
    }
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Vec<f32>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct SemanticCache {
    entries: DashMap<String, Arc<CacheEntry>>,
    embedder: Arc<dyn EmbeddingModel>,
    /// Minimum response length (chars) a response must have to be written
    /// into the semantic layer; 0 disables the gate.
    min_response_chars: usize,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, min_response_chars: usize) -> Self {
        Self {
            entries: DashMap::new(),
            embedder,
            min_response_chars,
        }
    }

    pub async fn embed_query(&self, prompt: &LogicalPrompt) -> Vec<f32> {
        let text = prompt.semantic_key_text();
        let truncated: String = text.chars().take(8000 * 4).collect();
        self.embedder.embed(&truncated).await
    }

    /// Search by cosine similarity; a result matches iff similarity is at
    /// least `threshold(category)`. Ties resolved by most recent
    /// `created_at`. Returns the winning similarity alongside the entry so
    /// callers can report it.
    pub fn search(&self, query_embedding: &[f32], category: Option<&str>) -> Option<(f32, Arc<CacheEntry>)> {
        let threshold = category_threshold(category);
        let mut best: Option<(f32, Arc<CacheEntry>)> = None;

        for item in self.entries.iter() {
            let entry = item.value();
            if !entry.participates_in_semantic_search() {
                continue;
            }
            let embedding = entry.embedding.as_ref().unwrap();
            let similarity = cosine_similarity(query_embedding, embedding);
            if similarity < threshold {
                continue;
            }
            match &best {
                None => best = Some((similarity, entry.clone())),
                Some((best_sim, best_entry)) => {
                    if similarity > *best_sim
                        || (similarity == *best_sim && entry.created_at > best_entry.created_at)
                    {
                        best = Some((similarity, entry.clone()));
                    }
                }
            }
        }

        best
    }

    /// Write-gate: only store an entry if its response meets the
    /// configured minimum length.
    pub fn insert(&self, entry: CacheEntry) {
        if entry.choice.content.chars().count() < self.min_response_chars {
            return;
        }
        self.entries.insert(entry.cache_key.clone(), Arc::new(entry));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Choice, FinishReason, Usage};
    use chrono::{Duration, Utc};

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Vec<f32> {
            self.0.clone()
        }
    }

    fn entry_with_embedding(key: &str, embedding: Vec<f32>, content_len: usize) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            cache_key: key.to_string(),
            embedding: Some(embedding),
            category: Some("factual_qa".into()),
            provider_id: "anthropic".into(),
            model_id: "claude-haiku".into(),
            choice: Choice {
                content: "x".repeat(content_len),
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason: FinishReason::Stop,
            },
            usage: Usage::default(),
            created_at: now,
            expires_at: now + Duration::hours(24),
            hit_count: 0,
        }
    }

    #[test]
    fn category_thresholds_match_spec() {
        assert_eq!(category_threshold(Some("factual_qa")), 0.92);
        assert_eq!(category_threshold(Some("code_generation")), 0.88);
        assert_eq!(category_threshold(Some("summarization")), 0.85);
        assert_eq!(category_threshold(Some("creative_writing")), 0.75);
        assert_eq!(category_threshold(None), 0.85);
    }

    #[test]
    fn identical_vectors_match_above_threshold() {
        let cache = SemanticCache::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), 0);
        cache.insert(entry_with_embedding("k1", vec![1.0, 0.0], 10));
        let hit = cache.search(&[1.0, 0.0], Some("factual_qa"));
        let (similarity, _) = hit.unwrap();
        assert!((similarity - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn orthogonal_vectors_never_match() {
        let cache = SemanticCache::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), 0);
        cache.insert(entry_with_embedding("k1", vec![1.0, 0.0], 10));
        let hit = cache.search(&[0.0, 1.0], Some("factual_qa"));
        assert!(hit.is_none());
    }

    #[test]
    fn min_response_chars_gate_rejects_short_responses() {
        let cache = SemanticCache::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), 50);
        cache.insert(entry_with_embedding("k1", vec![1.0, 0.0], 10));
        assert!(cache.is_empty());
    }
}
