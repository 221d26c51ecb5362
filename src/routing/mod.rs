//! Routing Engine: filters and ranks candidate models for a request.

pub mod hooks;

pub use hooks::{HookRegistry, RoutingHook};

use std::cmp::Ordering;
use std::sync::Arc;

use crate::circuit::CircuitBreaker;
use crate::domain::{
    Candidate, CostPreference, DecisionReason, InferenceRequest, ModelDefinition, RoutingDecision,
};
use crate::error::GatewayError;
use crate::registry::RegistrySnapshot;

const MAX_FALLBACKS: usize = 4;

pub struct RoutingEngine {
    circuit: Arc<CircuitBreaker>,
}

impl RoutingEngine {
    pub fn new(circuit: Arc<CircuitBreaker>) -> Self {
        Self { circuit }
    }

    /// Filters the registry snapshot down to eligible candidates, ranks
    /// them, and returns the winner plus an ordered fallback list.
    pub async fn select(
        &self,
        request: &InferenceRequest,
        snapshot: &RegistrySnapshot,
        estimated_input_tokens: u32,
    ) -> Result<RoutingDecision, GatewayError> {
        let allowed_regions = if request.residency.allowed_regions.is_empty() {
            None
        } else {
            Some(&request.residency.allowed_regions)
        };

        // Steps 1-3: capability, context window, residency.
        let mut candidates: Vec<&ModelDefinition> = snapshot.find(
            &request.required_capabilities,
            estimated_input_tokens + request.token_budget.max_output,
            allowed_regions,
            &request.residency.excluded_providers,
        );

        // Step 4: drop models with no usable (provider, region) pair.
        let mut usable: Vec<(&ModelDefinition, Vec<String>)> = Vec::new();
        for model in candidates.drain(..) {
            let mut usable_regions = Vec::new();
            for region in &model.regions {
                if self.circuit.is_usable(&model.provider_id, region).await.is_ok() {
                    usable_regions.push(region.clone());
                }
            }
            if !usable_regions.is_empty() {
                usable.push((model, usable_regions));
            }
        }

        // Step 5: latency-class filter.
        let ceiling = request.latency_class.p99_ceiling_ms();
        let mut usable: Vec<(&ModelDefinition, Vec<String>)> = usable
            .into_iter()
            .filter(|(model, _)| ceiling.map(|c| model.latency.p99_ms < c).unwrap_or(true))
            .collect();

        let candidates_evaluated = usable.len();

        // Step 6: strategy.
        if let Some(preferred) = &request.routing_hints.preferred_provider {
            usable.retain(|(model, _)| &model.provider_id == preferred);
            if usable.is_empty() {
                return Err(GatewayError::NoCandidate);
            }
            let reason = DecisionReason::ProviderPinned;
            return self.finalize(usable, reason, candidates_evaluated);
        }

        let task_type = request.routing_hints.task_type.as_deref().unwrap_or("");
        let (sorted, reason) = match request.routing_hints.cost_preference {
            Some(CostPreference::Cheapest) => (sort_cost_optimized(usable), DecisionReason::CostOptimized),
            Some(CostPreference::Quality) => (sort_quality_optimized(usable, task_type), DecisionReason::QualityOptimized),
            Some(CostPreference::Latency) => (sort_latency_optimized(usable), DecisionReason::LatencyOptimized),
            Some(CostPreference::Balanced) | None => (sort_capability_first(usable), DecisionReason::CapabilityMatch),
        };

        if sorted.is_empty() {
            return Err(GatewayError::NoCandidate);
        }

        self.finalize(sorted, reason, candidates_evaluated)
    }

    fn finalize(
        &self,
        sorted: Vec<(&ModelDefinition, Vec<String>)>,
        reason: DecisionReason,
        candidates_evaluated: usize,
    ) -> Result<RoutingDecision, GatewayError> {
        let mut candidates: Vec<Candidate> = sorted
            .into_iter()
            .map(|(model, regions)| Candidate {
                model_id: model.model_id.clone(),
                provider_id: model.provider_id.clone(),
                // Step 8: preferred-region order, first usable wins.
                region: regions.into_iter().next().unwrap_or_default(),
            })
            .collect();

        let selected = candidates.remove(0);
        candidates.truncate(MAX_FALLBACKS);

        Ok(RoutingDecision {
            selected,
            fallbacks: candidates,
            reason,
            candidates_evaluated,
        })
    }
}

fn sort_capability_first<'a>(mut items: Vec<(&'a ModelDefinition, Vec<String>)>) -> Vec<(&'a ModelDefinition, Vec<String>)> {
    items.sort_by(|(a, _), (b, _)| {
        b.has_capacity_hint()
            .cmp(&a.has_capacity_hint())
            .then_with(|| {
                a.effective_cost_per_million()
                    .partial_cmp(&b.effective_cost_per_million())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    items
}

fn sort_cost_optimized<'a>(mut items: Vec<(&'a ModelDefinition, Vec<String>)>) -> Vec<(&'a ModelDefinition, Vec<String>)> {
    items.sort_by(|(a, _), (b, _)| {
        a.effective_cost_per_million()
            .partial_cmp(&b.effective_cost_per_million())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.latency.p99_ms.cmp(&b.latency.p99_ms))
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    items
}

fn sort_latency_optimized<'a>(mut items: Vec<(&'a ModelDefinition, Vec<String>)>) -> Vec<(&'a ModelDefinition, Vec<String>)> {
    items.sort_by(|(a, _), (b, _)| {
        a.latency
            .p50_ms
            .cmp(&b.latency.p50_ms)
            .then_with(|| {
                a.effective_cost_per_million()
                    .partial_cmp(&b.effective_cost_per_million())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    items
}

fn sort_quality_optimized<'a>(
    mut items: Vec<(&'a ModelDefinition, Vec<String>)>,
    task_type: &str,
) -> Vec<(&'a ModelDefinition, Vec<String>)> {
    items.sort_by(|(a, _), (b, _)| {
        b.quality_score(task_type)
            .partial_cmp(&a.quality_score(task_type))
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.effective_cost_per_million()
                    .partial_cmp(&b.effective_cost_per_million())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Capability, LatencyClass, LogicalPrompt, ResidencyConstraints, RoutingHints, TokenBudget};
    use crate::events::TracingEventEmitter;
    use crate::registry::ModelRegistry;
    use chrono::Utc;
    use std::collections::HashSet;

    fn model(id: &str, provider: &str, cost: f64, p99: u64) -> ModelDefinition {
        ModelDefinition {
            model_id: id.to_string(),
            provider_id: provider.to_string(),
            capabilities: HashSet::from([Capability::Text]),
            context_window: 128_000,
            max_output_tokens: 4096,
            prices: crate::domain::model::PerMillionPrices {
                input_cents: cost,
                output_cents: 0.0,
                cached_input_cents: 0.0,
            },
            rate_limits: Default::default(),
            latency: crate::domain::model::LatencyEstimates { p50_ms: 300, p99_ms: p99 },
            tier: crate::domain::Tier::Standard,
            status: crate::domain::ModelStatus::Active,
            regions: vec!["us-east-1".to_string()],
            provisioned_throughput: Default::default(),
            quality_scores: Default::default(),
            pricing_last_updated: Utc::now(),
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            request_id: "req-1".into(),
            principal_id: "p1".into(),
            organization_id: None,
            project_id: None,
            prompt: LogicalPrompt::default(),
            required_capabilities: HashSet::from([Capability::Text]),
            latency_class: LatencyClass::Interactive,
            token_budget: TokenBudget {
                max_input: 1000,
                max_output: 500,
                max_cost_cents: 100.0,
            },
            routing_hints: RoutingHints::default(),
            residency: ResidencyConstraints::default(),
            deadline: Utc::now() + chrono::Duration::seconds(30),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn selects_cheapest_under_default_strategy() {
        let circuit = Arc::new(CircuitBreaker::new(Default::default(), Arc::new(TracingEventEmitter)));
        let engine = RoutingEngine::new(circuit);
        let registry = ModelRegistry::new(vec![
            model("expensive", "openai", 10.0, 1000),
            model("cheap", "anthropic", 1.0, 1000),
        ]);
        let snapshot = registry.snapshot().await;

        let decision = engine.select(&request(), &snapshot, 100).await.unwrap();
        assert_eq!(decision.selected.model_id, "cheap");
    }

    #[tokio::test]
    async fn provider_pinned_errors_when_preferred_provider_absent() {
        let circuit = Arc::new(CircuitBreaker::new(Default::default(), Arc::new(TracingEventEmitter)));
        let engine = RoutingEngine::new(circuit);
        let registry = ModelRegistry::new(vec![model("m1", "anthropic", 1.0, 1000)]);
        let snapshot = registry.snapshot().await;

        let mut req = request();
        req.routing_hints.preferred_provider = Some("google".to_string());

        let result = engine.select(&req, &snapshot, 100).await;
        assert!(matches!(result, Err(GatewayError::NoCandidate)));
    }

    #[tokio::test]
    async fn latency_preference_selects_fastest_p50() {
        let circuit = Arc::new(CircuitBreaker::new(Default::default(), Arc::new(TracingEventEmitter)));
        let engine = RoutingEngine::new(circuit);
        let mut slow = model("slow-cheap", "openai", 1.0, 1000);
        slow.latency.p50_ms = 800;
        let mut fast = model("fast-pricier", "anthropic", 5.0, 1000);
        fast.latency.p50_ms = 120;
        let registry = ModelRegistry::new(vec![slow, fast]);
        let snapshot = registry.snapshot().await;

        let mut req = request();
        req.routing_hints.cost_preference = Some(CostPreference::Latency);

        let decision = engine.select(&req, &snapshot, 100).await.unwrap();
        assert_eq!(decision.selected.model_id, "fast-pricier");
        assert!(matches!(decision.reason, DecisionReason::LatencyOptimized));
    }

    #[tokio::test]
    async fn latency_class_filters_out_slow_models() {
        let circuit = Arc::new(CircuitBreaker::new(Default::default(), Arc::new(TracingEventEmitter)));
        let engine = RoutingEngine::new(circuit);
        let registry = ModelRegistry::new(vec![model("slow", "anthropic", 1.0, 9000)]);
        let snapshot = registry.snapshot().await;

        let mut req = request();
        req.latency_class = LatencyClass::Realtime;

        let result = engine.select(&req, &snapshot, 100).await;
        assert!(matches!(result, Err(GatewayError::NoCandidate)));
    }
}
