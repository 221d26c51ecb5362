//! HTTP wire types for the gateway's RPC surface.
//!
//! Request/response structs with explicit serde attributes, a shared
//! `ErrorResponse`/`ErrorDetail` shape, and small helper constructors,
//! carrying the gateway's own `InferenceRequest`/`InferenceResponse`
//! contract. Most inner shapes (`LogicalPrompt`, `TokenBudget`,
//! `RoutingHints`, ...) are the domain types themselves: they already
//! derive `Serialize`/`Deserialize` with the field names this surface is
//! meant to expose, so there is no separate wire/domain pair to keep in
//! sync for those.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    BudgetLevel, Capability, CircuitState, InferenceRequest, LatencyClass, LogicalPrompt, ModelDefinition,
    ModelStatus, ResidencyConstraints, RoutingHints, TokenBudget,
};

/// Inbound body for `POST /v1/infer` and `POST /v1/infer/stream`.
///
/// `principal_id`/`organization_id`/`project_id` are carried for audit
/// purposes only -- the authoritative identity is whatever the bearer
/// token resolves to via [`crate::auth::PrincipalResolver`], checked
/// inside the dispatcher itself.
#[derive(Debug, Clone, Deserialize)]
pub struct InferRequestBody {
    pub request_id: Option<String>,
    #[serde(default)]
    pub principal_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub prompt: LogicalPrompt,
    #[serde(default)]
    pub required_capabilities: HashSet<Capability>,
    #[serde(default = "default_latency_class")]
    pub latency_class: LatencyClass,
    pub token_budget: TokenBudget,
    #[serde(default)]
    pub routing_hints: RoutingHints,
    #[serde(default)]
    pub residency: ResidencyConstraints,
    /// Milliseconds from the moment the request is received until its
    /// deadline. Defaults to 30s when omitted.
    pub deadline_ms: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_latency_class() -> LatencyClass {
    LatencyClass::Interactive
}

const DEFAULT_DEADLINE_MS: i64 = 30_000;

impl InferRequestBody {
    /// Fills in a request id and an absolute deadline, producing the
    /// gateway's own [`InferenceRequest`].
    pub fn into_domain(self, now: DateTime<Utc>) -> InferenceRequest {
        let deadline_ms = self.deadline_ms.unwrap_or(DEFAULT_DEADLINE_MS);
        InferenceRequest {
            request_id: self.request_id.unwrap_or_else(crate::domain::request::new_request_id),
            principal_id: self.principal_id,
            organization_id: self.organization_id,
            project_id: self.project_id,
            prompt: self.prompt,
            required_capabilities: self.required_capabilities,
            latency_class: self.latency_class,
            token_budget: self.token_budget,
            routing_hints: self.routing_hints,
            residency: self.residency,
            deadline: now + chrono::Duration::milliseconds(deadline_ms),
            metadata: self.metadata,
        }
    }
}

/// `POST /v1/batch` body: a list of independently-dispatched requests,
/// admitted under a single batch handle.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchInferRequest {
    pub requests: Vec<InferRequestBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchAcceptedResponse {
    pub batch_id: String,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub request_id: String,
    pub ok: bool,
    pub response: Option<crate::domain::InferenceResponse>,
    pub error: Option<ErrorDetail>,
}

/// `GET /v1/batch/:handle` response.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub completed: usize,
    pub total: usize,
    pub results: Vec<BatchItemResult>,
}

/// `GET /v1/models` response.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelDefinition>,
}

/// `POST /v1/models/query` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelQueryRequest {
    #[serde(default)]
    pub required_capabilities: HashSet<Capability>,
    #[serde(default)]
    pub min_context: u32,
    #[serde(default)]
    pub allowed_regions: Option<HashSet<String>>,
    #[serde(default)]
    pub excluded_providers: HashSet<String>,
}

/// `POST /v1/models/:id/status` body.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateModelStatusRequest {
    pub status: ModelStatus,
}

/// `POST /v1/cache/invalidate` body. Exactly one of `cache_key`/`prefix`
/// is expected; `prefix` wins if both are set.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheInvalidateRequest {
    pub cache_key: Option<String>,
    pub prefix: Option<String>,
}

/// `POST /v1/cache/warm` body: pre-populate the exact cache with a known
/// prompt/response pair, bypassing a live provider call.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheWarmRequest {
    pub prompt: LogicalPrompt,
    pub provider_id: String,
    pub model_id: String,
    pub choice: crate::domain::Choice,
    #[serde(default)]
    pub usage: crate::domain::Usage,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_warm_ttl_seconds")]
    pub ttl_seconds: i64,
}

fn default_warm_ttl_seconds() -> i64 {
    24 * 3600
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheWarmResponse {
    pub cache_key: String,
}

/// `POST /v1/budget/override` body.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetOverrideRequest {
    pub level: BudgetLevel,
    pub key: String,
    pub amount_cents: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetOverrideResponse {
    pub level: BudgetLevel,
    pub key: String,
    pub remaining_cents: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub registered_models: usize,
    pub registered_adapters: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub region: String,
    pub circuit: Option<CircuitState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthResponse {
    pub providers: Vec<ProviderHealth>,
}

/// Snapshot-style metrics surface: the ambient observability the gateway
/// carries without pulling in a dedicated metrics exporter. A minimal JSON
/// gauge snapshot that keeps `/metrics` truthful without fabricating a
/// new dependency.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub registered_models: usize,
    pub exact_cache_entries: u64,
    pub semantic_cache_entries: Option<usize>,
    pub budget_snapshot: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn from_gateway_error(error: &crate::error::GatewayError) -> Self {
        Self {
            error: ErrorDetail {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }
}
