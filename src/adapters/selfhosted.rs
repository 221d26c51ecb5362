//! Self-hosted adapter (vLLM / Ollama / any OpenAI-wire-compatible
//! endpoint), grounded on `llm::providers::{ollama,vllm}::client` in the
//! teacher: same base shape as the hosted OpenAI adapter, but credentials
//! are optional (self-hosted deployments commonly run without an API key)
//! and the token counter falls back to whitespace estimation when the
//! model isn't one of the tokenizer-known families.

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
use crate::tokens::{TokenCounter, WhitespaceTokenCounter};

use super::{
    classify_http_status, sse::SseParser, Adapter, AdapterError, AdapterResult, FrameStream,
    HealthCheckResult, InvokeOutcome,
};

pub struct SelfHostedAdapter {
    client: Client,
    base_url: String,
    provider_id: String,
    token_counter: WhitespaceTokenCounter,
}

impl SelfHostedAdapter {
    pub fn new(provider_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into(),
            provider_id: provider_id.into(),
            token_counter: WhitespaceTokenCounter,
        }
    }

    fn headers(&self, credential: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !credential.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {credential}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
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
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl Adapter for SelfHostedAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn invoke(
        &self,
        request: &InferenceRequest,
        model_id: &str,
        credential: &str,
    ) -> AdapterResult<InvokeOutcome> {
        let payload = self.convert_request(request, model_id, false);
        let started = Instant::now();

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .headers(self.headers(credential))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AdapterError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AdapterError::Unknown {
            permanent: true,
            message: format!("failed to parse self-hosted response: {e}"),
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| AdapterError::Unknown {
            permanent: true,
            message: "self-hosted response carried no choices".into(),
        })?;

        let usage = parsed.usage.unwrap_or_default();
        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        Ok(InvokeOutcome {
            choice: Choice {
                content: choice.message.content,
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason,
            },
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
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
        let payload = self.convert_request(request, model_id, true);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .headers(self.headers(credential))
            .json(&payload)
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
                            usage: Usage::default(),
                        });
                        return;
                    }
                    let value: serde_json::Value = match serde_json::from_str(&event.data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(content) = value.pointer("/choices/0/delta/content").and_then(|c| c.as_str()) {
                        yield Ok(StreamFrame::Delta { content: content.to_string(), tool_call_fragment: None });
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
        let started = Instant::now();
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .headers(self.headers(credential))
            .timeout(Duration::from_secs(5))
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
