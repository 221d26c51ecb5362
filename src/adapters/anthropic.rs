//! Anthropic adapter.
//!
//! Header-building, request conversion and pricing-table shape for the
//! Messages API, built against the gateway's normalized
//! `InferenceRequest`/`StreamFrame` types.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client,
};
use serde::Deserialize;
use serde_json::json;

use crate::domain::{Choice, FinishReason, InferenceRequest, Role, StreamFrame, Usage};
use crate::tokens::{BpeTokenCounter, TokenCounter};

use super::{
    classify_http_status, sse::SseParser, Adapter, AdapterError, AdapterResult, FrameStream,
    HealthCheckResult, InvokeOutcome,
};

pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    token_counter: BpeTokenCounter,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token_counter: BpeTokenCounter::new(),
        }
    }

    fn headers(&self, credential: &str) -> AdapterResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(credential)
                .map_err(|_| AdapterError::InvalidRequest("credential has invalid header bytes".into()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        Ok(headers)
    }

    fn convert_request(&self, request: &InferenceRequest, model_id: &str, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        for m in &request.prompt.messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                // Anthropic has no `system`/`tool` turn role in the messages array;
                // system goes in its own top-level field, and tool results are
                // folded back in as user turns, matching the provider's wire shape.
                Role::System | Role::Tool => "user",
            };
            messages.push(json!({"role": role, "content": m.content}));
        }

        json!({
            "model": model_id,
            "system": request.prompt.system_message,
            "messages": messages,
            "max_tokens": request.token_budget.max_output.max(1),
            "stream": stream,
        })
    }

    fn finish_reason(stop_reason: Option<&str>) -> FinishReason {
        match stop_reason {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn invoke(
        &self,
        request: &InferenceRequest,
        model_id: &str,
        credential: &str,
    ) -> AdapterResult<InvokeOutcome> {
        let headers = self.headers(credential)?;
        let payload = self.convert_request(request, model_id, false);
        let started = Instant::now();

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .headers(headers)
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Unknown {
                permanent: true,
                message: format!("failed to parse anthropic response: {e}"),
            })?;

        let content = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");

        Ok(InvokeOutcome {
            choice: Choice {
                content,
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason: Self::finish_reason(parsed.stop_reason.as_deref()),
            },
            usage: Usage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
                cost_cents: 0.0, // filled in by post-process via registry pricing
            },
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn invoke_stream(
        &self,
        request: &InferenceRequest,
        model_id: &str,
        credential: &str,
    ) -> AdapterResult<FrameStream> {
        let headers = self.headers(credential)?;
        let payload = self.convert_request(request, model_id, true);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .headers(headers)
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseParser::new();
            let mut final_usage = Usage::default();
            loop {
                let next = byte_stream.next().await;
                let chunk = match next {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        yield Err(AdapterError::Transient(e.to_string()));
                        return;
                    }
                    None => break,
                };
                for event in parser.push(&chunk) {
                    if event.data.trim().is_empty() || event.data.trim() == "[DONE]" {
                        continue;
                    }
                    let value: serde_json::Value = match serde_json::from_str(&event.data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    match value.get("type").and_then(|t| t.as_str()) {
                        Some("content_block_delta") => {
                            if let Some(text) = value
                                .pointer("/delta/text")
                                .and_then(|t| t.as_str())
                            {
                                yield Ok(StreamFrame::Delta {
                                    content: text.to_string(),
                                    tool_call_fragment: None,
                                });
                            }
                        }
                        Some("message_delta") => {
                            if let Some(usage) = value.get("usage") {
                                final_usage.completion_tokens =
                                    usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                            }
                        }
                        Some("message_stop") => {
                            yield Ok(StreamFrame::Final {
                                choice: Choice {
                                    content: String::new(),
                                    tool_calls: Vec::new(),
                                    structured_output: None,
                                    finish_reason: FinishReason::Stop,
                                },
                                usage: final_usage.clone(),
                            });
                        }
                        Some("error") => {
                            let message = value
                                .pointer("/error/message")
                                .and_then(|m| m.as_str())
                                .unwrap_or("unknown anthropic stream error")
                                .to_string();
                            yield Err(AdapterError::Transient(message));
                            return;
                        }
                        _ => {}
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn count_tokens(&self, text: &str, model_id: &str) -> u32 {
        self.token_counter.count_tokens(text, model_id)
    }

    async fn health_check(&self, credential: &str) -> AdapterResult<HealthCheckResult> {
        let headers = self.headers(credential)?;
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .headers(headers)
            .json(&json!({
                "model": "claude-haiku-3-5",
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "ping"}],
            }))
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(HealthCheckResult {
                ok: resp.status().as_u16() != 401,
                latency_ms: started.elapsed().as_millis() as u64,
            }),
            Err(_) => Ok(HealthCheckResult {
                ok: false,
                latency_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Capability, LatencyClass, LogicalPrompt, TokenBudget};
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};

    fn sample_request() -> InferenceRequest {
        InferenceRequest {
            request_id: "req-1".into(),
            principal_id: "p1".into(),
            organization_id: None,
            project_id: None,
            prompt: LogicalPrompt {
                system_message: Some("You are helpful.".into()),
                messages: vec![crate::domain::Message {
                    role: Role::User,
                    content: "What is 2+2?".into(),
                }],
                tools: Vec::new(),
                output_schema: None,
            },
            required_capabilities: HashSet::from([Capability::Text]),
            latency_class: LatencyClass::Interactive,
            token_budget: TokenBudget {
                max_input: 100,
                max_output: 100,
                max_cost_cents: 10.0,
            },
            routing_hints: Default::default(),
            residency: Default::default(),
            deadline: Utc::now() + chrono::Duration::seconds(30),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn convert_request_carries_system_and_messages() {
        let adapter = AnthropicAdapter::new("https://api.anthropic.com");
        let payload = adapter.convert_request(&sample_request(), "claude-haiku-3-5", false);
        assert_eq!(payload["model"], "claude-haiku-3-5");
        assert_eq!(payload["system"], "You are helpful.");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["stream"], false);
    }

    #[test]
    fn finish_reason_maps_stop_sequences() {
        assert!(matches!(
            AnthropicAdapter::finish_reason(Some("end_turn")),
            FinishReason::Stop
        ));
        assert!(matches!(
            AnthropicAdapter::finish_reason(Some("max_tokens")),
            FinishReason::Length
        ));
    }

    #[test]
    fn token_counting_is_deterministic() {
        let adapter = AnthropicAdapter::new("https://api.anthropic.com");
        let a = adapter.count_tokens("hello there", "claude-haiku-3-5");
        let b = adapter.count_tokens("hello there", "claude-haiku-3-5");
        assert_eq!(a, b);
    }
}
