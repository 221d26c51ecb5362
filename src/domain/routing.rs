//! Routing decision output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    CapabilityMatch,
    CostOptimized,
    LatencyOptimized,
    QualityOptimized,
    ProviderPinned,
    Fallback,
}

/// A (model, provider, region) tuple produced by the router after filters
/// (GLOSSARY "Candidate").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub model_id: String,
    pub provider_id: String,
    pub region: String,
}

/// Lifecycle: created per request, not persisted beyond the resulting event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected: Candidate,
    pub fallbacks: Vec<Candidate>,
    pub reason: DecisionReason,
    pub candidates_evaluated: usize,
}

impl RoutingDecision {
    /// The full ordered attempt sequence: selected candidate first, then fallbacks.
    pub fn attempt_order(&self) -> Vec<&Candidate> {
        std::iter::once(&self.selected)
            .chain(self.fallbacks.iter())
            .collect()
    }
}
