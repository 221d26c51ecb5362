//! The inbound request contract.
//!
//! The logical prompt is a tagged variant over a closed role enumeration
//! rather than a free-form map, and routing/residency hints are their own
//! structs instead of loose optional fields.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A capability a candidate model must expose to be eligible for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Vision,
    ToolUse,
    Streaming,
    JsonMode,
    LongContext,
}

/// Caller's latency expectation; constrains which models pass routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LatencyClass {
    Realtime,
    Interactive,
    Batch,
}

impl LatencyClass {
    /// p99 ceiling (ms) this class imposes on candidates, or `None` for unconstrained.
    pub fn p99_ceiling_ms(self) -> Option<u64> {
        match self {
            LatencyClass::Realtime => Some(2_000),
            LatencyClass::Interactive => Some(5_000),
            LatencyClass::Batch => None,
        }
    }
}

/// Closed role enumeration for messages in a logical prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single turn in the ordered message sequence. Content is opaque to the
/// core: the gateway neither parses nor interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A tool the model may invoke, described opaquely (name + JSON schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A model-emitted tool invocation, surfaced in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// The caller's answer to a prior `ToolCall`, fed back in a later turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
}

/// Provider-agnostic structured prompt, produced upstream and consumed
/// opaquely by the core (spec GLOSSARY: "Logical prompt").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogicalPrompt {
    pub system_message: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub output_schema: Option<serde_json::Value>,
}

impl LogicalPrompt {
    /// Canonical serialization used as the exact-cache key input: system
    /// message, ordered messages, tool names sorted, output schema.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut tool_names: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
        tool_names.sort_unstable();

        let canonical = serde_json::json!({
            "system": self.system_message,
            "messages": self.messages,
            "tools": tool_names,
            "schema": self.output_schema,
        });
        // `to_vec` on a `serde_json::Value` built from sorted, stable fields
        // is itself stable across calls for the same logical content.
        serde_json::to_vec(&canonical).expect("canonical prompt value is always serializable")
    }

    /// `concat(system_message, last N=3 user messages)` used for the
    /// semantic-cache embedding key, truncated by the caller to 8000
    /// tokens before embedding.
    pub fn semantic_key_text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(system) = &self.system_message {
            parts.push(system.clone());
        }
        let last_user: Vec<&str> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .take(3)
            .map(|m| m.content.as_str())
            .collect();
        parts.extend(last_user.into_iter().rev().map(str::to_string));
        parts.join("\n")
    }
}

/// Per-request token/cost ceiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenBudget {
    pub max_input: u32,
    pub max_output: u32,
    pub max_cost_cents: f64,
}

/// Caller-supplied hints that bias, but do not dictate, routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingHints {
    pub preferred_provider: Option<String>,
    pub allow_fallback: bool,
    pub cache_enabled: bool,
    pub allow_compression: bool,
    pub cost_preference: Option<CostPreference>,
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPreference {
    Cheapest,
    Balanced,
    Quality,
    Latency,
}

/// Data-residency constraints narrowing the candidate set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResidencyConstraints {
    pub allowed_regions: HashSet<String>,
    pub excluded_providers: HashSet<String>,
}

/// The gateway's input contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Unique per submission; also the idempotency key.
    pub request_id: String,
    pub principal_id: String,
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
    pub prompt: LogicalPrompt,
    pub required_capabilities: HashSet<Capability>,
    pub latency_class: LatencyClass,
    pub token_budget: TokenBudget,
    pub routing_hints: RoutingHints,
    pub residency: ResidencyConstraints,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InferenceRequest {
    /// Milliseconds remaining until `deadline`, clamped to zero when past due.
    pub fn remaining_budget_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_milliseconds().max(0)
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// A freshly-generated request identity, used by handlers that accept a
/// caller-supplied `request_id` or mint one (e.g. for `WarmCache`).
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}
