//! OpenAI (and OpenAI-wire-compatible) adapter.
//!
//! Parses OpenAI's `choices[].delta` streaming shape; request/response
//! conversion follows the chat-completions body shape.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
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

pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
    token_counter: BpeTokenCounter,
}

impl OpenAiAdapter {
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
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|_| AdapterError::InvalidRequest("credential has invalid header bytes".into()))?,
        );
        Ok(headers)
    }

    fn convert_request(&self, request: &InferenceRequest, model_id: &str, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.prompt.system_message {
            messages.push(json!({"role": "system", "content": system}));
        }
        for m in &request.prompt.messages {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            messages.push(json!({"role": role, "content": m.content}));
        }

        json!({
            "model": model_id,
            "messages": messages,
            "max_tokens": request.token_budget.max_output,
            "stream": stream,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFiltered,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl Adapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        "openai"
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
            .post(format!("{}/v1/chat/completions", self.base_url))
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

        let parsed: OpenAiResponse = response.json().await.map_err(|e| AdapterError::Unknown {
            permanent: true,
            message: format!("failed to parse openai response: {e}"),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Unknown {
                permanent: true,
                message: "openai response carried no choices".into(),
            })?;

        Ok(InvokeOutcome {
            choice: Choice {
                content: choice.message.content,
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason: finish_reason(choice.finish_reason.as_deref()),
            },
            usage: Usage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
                cost_cents: 0.0,
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
            .post(format!("{}/v1/chat/completions", self.base_url))
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
            let mut usage = Usage::default();
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
                    if event.data.trim() == "[DONE]" {
                        yield Ok(StreamFrame::Final {
                            choice: Choice {
                                content: String::new(),
                                tool_calls: Vec::new(),
                                structured_output: None,
                                finish_reason: FinishReason::Stop,
                            },
                            usage: usage.clone(),
                        });
                        return;
                    }
                    let value: serde_json::Value = match serde_json::from_str(&event.data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(u) = value.get("usage") {
                        usage.prompt_tokens = u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                        usage.completion_tokens = u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                        usage.total_tokens = u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    }
                    if let Some(content) = value.pointer("/choices/0/delta/content").and_then(|c| c.as_str()) {
                        yield Ok(StreamFrame::Delta {
                            content: content.to_string(),
                            tool_call_fragment: None,
                        });
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
            .get(format!("{}/v1/models", self.base_url))
            .headers(headers)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(HealthCheckResult {
                ok: resp.status().is_success(),
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

    #[test]
    fn finish_reason_maps_known_values() {
        assert!(matches!(finish_reason(Some("length")), FinishReason::Length));
        assert!(matches!(
            finish_reason(Some("content_filter")),
            FinishReason::ContentFiltered
        ));
        assert!(matches!(finish_reason(None), FinishReason::Stop));
    }
}
