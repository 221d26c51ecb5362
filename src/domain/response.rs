//! The gateway's normalized response and streaming frame shapes, carrying
//! tool calls and structured output alongside text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFiltered,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_cents: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub structured_output: Option<serde_json::Value>,
    pub finish_reason: FinishReason,
}

/// Normalized, provider-agnostic inference result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub provider_id: String,
    pub model_id: String,
    pub region: String,
    pub choice: Choice,
    pub usage: Usage,
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
}

/// One normalized chunk of a streaming response: a strictly ordered
/// sequence terminated by exactly one final frame
/// bearing usage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamFrame {
    Delta {
        content: String,
        tool_call_fragment: Option<ToolCall>,
    },
    Final {
        choice: Choice,
        usage: Usage,
    },
    Error {
        kind: String,
        message: String,
    },
}
