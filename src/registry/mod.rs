//! Model Registry.
//!
//! Global mutable state accessed only via typed handles: readers hold an
//! immutable snapshot `Arc`, writers swap in a new one atomically. The
//! snapshot maintains explicit capability/region indices rather than a
//! linear scan over every registered model.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{Capability, ModelDefinition, ModelStatus};

/// An immutable point-in-time view of the registry. In-flight requests
/// hold a clone of the `Arc` they captured and keep running against it
/// even after a reload swaps in a newer snapshot.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    models: HashMap<String, ModelDefinition>,
    by_capability: HashMap<Capability, HashSet<String>>,
    by_region: HashMap<String, HashSet<String>>,
}

impl RegistrySnapshot {
    pub fn from_models(models: Vec<ModelDefinition>) -> Self {
        let mut by_capability: HashMap<Capability, HashSet<String>> = HashMap::new();
        let mut by_region: HashMap<String, HashSet<String>> = HashMap::new();
        let mut by_id = HashMap::new();

        for model in models {
            for cap in &model.capabilities {
                by_capability.entry(*cap).or_default().insert(model.model_id.clone());
            }
            for region in &model.regions {
                by_region.entry(region.clone()).or_default().insert(model.model_id.clone());
            }
            by_id.insert(model.model_id.clone(), model);
        }

        Self {
            models: by_id,
            by_capability,
            by_region,
        }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDefinition> {
        self.models.get(model_id)
    }

    /// `find(capabilities, min_context, allowed_regions, exclude_providers, tier_cap)`
    /// narrows via the capability/region indices first, then does a linear
    /// scan over the (already small) intersection for the remaining filters.
    pub fn find(
        &self,
        capabilities: &HashSet<Capability>,
        min_context: u32,
        allowed_regions: Option<&HashSet<String>>,
        excluded_providers: &HashSet<String>,
    ) -> Vec<&ModelDefinition> {
        let candidate_ids: Option<HashSet<String>> = capabilities.iter().fold(None, |acc, cap| {
            let ids = self.by_capability.get(cap).cloned().unwrap_or_default();
            Some(match acc {
                Some(existing) => existing.intersection(&ids).cloned().collect(),
                None => ids,
            })
        });

        let candidate_ids = match candidate_ids {
            Some(ids) => ids,
            None => self.models.keys().cloned().collect(),
        };

        candidate_ids
            .iter()
            .filter_map(|id| self.models.get(id))
            .filter(|m| m.status == ModelStatus::Active)
            .filter(|m| m.context_window >= min_context)
            .filter(|m| !excluded_providers.contains(&m.provider_id))
            .filter(|m| {
                allowed_regions
                    .map(|allowed| m.regions.iter().any(|r| allowed.contains(r)))
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn query_by_capability(&self, caps: &HashSet<Capability>) -> Vec<&ModelDefinition> {
        self.find(caps, 0, None, &HashSet::new())
    }

    /// Every registered model, in no particular order. Used by the
    /// listing endpoint and by admin/metrics surfaces that need the full
    /// set rather than a filtered view.
    pub fn all(&self) -> Vec<&ModelDefinition> {
        self.models.values().collect()
    }

    /// Distinct (provider_id, region) pairs across the registry, used to
    /// drive the per-provider health check surface.
    pub fn provider_regions(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .models
            .values()
            .flat_map(|m| m.regions.iter().map(move |r| (m.provider_id.clone(), r.clone())))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// The process-wide handle: readers clone the current `Arc<RegistrySnapshot>`;
/// the reload loop constructs a fresh snapshot and swaps the pointer.
pub struct ModelRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl ModelRegistry {
    pub fn new(initial: Vec<ModelDefinition>) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::from_models(initial))),
        }
    }

    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().await.clone()
    }

    /// Atomically swap in a freshly-built registry instance. Failure mode
    /// on delivery error is the caller's job: keep serving the prior
    /// snapshot and emit a warning event -- this method simply
    /// never fails, so a failed fetch upstream should just not call it.
    pub async fn swap(&self, models: Vec<ModelDefinition>) {
        let fresh = Arc::new(RegistrySnapshot::from_models(models));
        *self.current.write().await = fresh;
    }

    pub async fn register(&self, model: ModelDefinition) {
        let mut guard = self.current.write().await;
        let mut models: Vec<ModelDefinition> = guard.models.values().cloned().collect();
        if let Some(existing) = models.iter_mut().find(|m| m.model_id == model.model_id) {
            *existing = model;
        } else {
            models.push(model);
        }
        *guard = Arc::new(RegistrySnapshot::from_models(models));
    }

    pub async fn set_status(&self, model_id: &str, status: ModelStatus) -> bool {
        let mut guard = self.current.write().await;
        let mut models: Vec<ModelDefinition> = guard.models.values().cloned().collect();
        let Some(model) = models.iter_mut().find(|m| m.model_id == model_id) else {
            return false;
        };
        model.status = status;
        *guard = Arc::new(RegistrySnapshot::from_models(models));
        true
    }
}

impl Clone for ModelDefinition {
    fn clone(&self) -> Self {
        ModelDefinition {
            model_id: self.model_id.clone(),
            provider_id: self.provider_id.clone(),
            capabilities: self.capabilities.clone(),
            context_window: self.context_window,
            max_output_tokens: self.max_output_tokens,
            prices: self.prices,
            rate_limits: self.rate_limits,
            latency: self.latency,
            tier: self.tier,
            status: self.status,
            regions: self.regions.clone(),
            provisioned_throughput: self.provisioned_throughput,
            quality_scores: self.quality_scores.clone(),
            pricing_last_updated: self.pricing_last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{LatencyEstimates, PerMillionPrices, RateLimits};
    use chrono::Utc;

    fn model(id: &str, provider: &str, caps: &[Capability], regions: &[&str]) -> ModelDefinition {
        ModelDefinition {
            model_id: id.to_string(),
            provider_id: provider.to_string(),
            capabilities: caps.iter().copied().collect(),
            context_window: 100_000,
            max_output_tokens: 4096,
            prices: PerMillionPrices::default(),
            rate_limits: RateLimits::default(),
            latency: LatencyEstimates { p50_ms: 400, p99_ms: 1200 },
            tier: crate::domain::Tier::Standard,
            status: ModelStatus::Active,
            regions: regions.iter().map(|r| r.to_string()).collect(),
            provisioned_throughput: Default::default(),
            quality_scores: HashMap::new(),
            pricing_last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn find_narrows_by_capability_and_region() {
        let registry = ModelRegistry::new(vec![
            model("claude-haiku", "anthropic", &[Capability::Text], &["us-east-1"]),
            model("gpt-4o", "openai", &[Capability::Text, Capability::Vision], &["us-east-1", "eu-west-1"]),
        ]);

        let snapshot = registry.snapshot().await;
        let caps = HashSet::from([Capability::Vision]);
        let found = snapshot.find(&caps, 0, None, &HashSet::new());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].model_id, "gpt-4o");
    }

    #[tokio::test]
    async fn swap_replaces_snapshot_atomically() {
        let registry = ModelRegistry::new(vec![model("m1", "anthropic", &[Capability::Text], &["us-east-1"])]);
        let before = registry.snapshot().await;
        assert_eq!(before.len(), 1);

        registry
            .swap(vec![
                model("m1", "anthropic", &[Capability::Text], &["us-east-1"]),
                model("m2", "openai", &[Capability::Text], &["us-east-1"]),
            ])
            .await;

        let after = registry.snapshot().await;
        assert_eq!(after.len(), 2);
        // the snapshot captured earlier is unaffected by the swap.
        assert_eq!(before.len(), 1);
    }

    #[tokio::test]
    async fn set_status_disables_a_model() {
        let registry = ModelRegistry::new(vec![model("m1", "anthropic", &[Capability::Text], &["us-east-1"])]);
        assert!(registry.set_status("m1", ModelStatus::Disabled).await);
        let snapshot = registry.snapshot().await;
        let caps = HashSet::from([Capability::Text]);
        assert!(snapshot.find(&caps, 0, None, &HashSet::new()).is_empty());
    }
}
