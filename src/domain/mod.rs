//! Core domain types shared across the gateway: the request/response
//! contract, the model registry's entry shape, and the runtime state kept
//! per routing decision, cache entry, rate-limit key, circuit, queued
//! request and budget.

pub mod budget;
pub mod cache;
pub mod circuit;
pub mod model;
pub mod probe;
pub mod queue;
pub mod rate_limit;
pub mod request;
pub mod response;
pub mod routing;

pub use budget::{Budget, BudgetLevel};
pub use cache::CacheEntry;
pub use circuit::{CircuitState, CircuitStatus};
pub use model::{ModelDefinition, ModelStatus, ProvisionedThroughput, Tier};
pub use probe::ProbeResult;
pub use queue::{Priority, QueuedRequest, QueuedRequestOrd};
pub use rate_limit::RateLimitState;
pub use request::{
    Capability, CostPreference, InferenceRequest, LatencyClass, LogicalPrompt, Message,
    ResidencyConstraints, Role, RoutingHints, TokenBudget, ToolCall, ToolDescriptor, ToolResult,
};
pub use response::{Choice, FinishReason, InferenceResponse, StreamFrame, Usage};
pub use routing::{Candidate, DecisionReason, RoutingDecision};
