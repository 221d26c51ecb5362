//! Google Vertex/Gemini adapter.
//!
//! Parses the `candidates`/`usageMetadata` response shape Gemini's
//! generateContent and streamGenerateContent endpoints return.

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

pub struct GoogleAdapter {
    client: Client,
    base_url: String,
    token_counter: BpeTokenCounter,
}

impl GoogleAdapter {
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

    fn convert_request(&self, request: &InferenceRequest) -> serde_json::Value {
        let contents: Vec<_> = request
            .prompt
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.token_budget.max_output,
            },
        });
        if let Some(system) = &request.prompt.system_message {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }

    fn url(&self, model_id: &str, stream: bool) -> String {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        format!("{}/v1/models/{model_id}:{method}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    candidates: Vec<GoogleCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GoogleUsage>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    content: GoogleContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleContent {
    parts: Vec<GooglePart>,
}

#[derive(Debug, Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
struct GoogleUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFiltered,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl Adapter for GoogleAdapter {
    fn provider_id(&self) -> &str {
        "google"
    }

    async fn invoke(
        &self,
        request: &InferenceRequest,
        model_id: &str,
        credential: &str,
    ) -> AdapterResult<InvokeOutcome> {
        let headers = self.headers(credential)?;
        let payload = self.convert_request(request);
        let started = Instant::now();

        let response = self
            .client
            .post(self.url(model_id, false))
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

        let parsed: GoogleResponse = response.json().await.map_err(|e| AdapterError::Unknown {
            permanent: true,
            message: format!("failed to parse google response: {e}"),
        })?;

        let candidate = parsed.candidates.into_iter().next().ok_or_else(|| AdapterError::Unknown {
            permanent: true,
            message: "google response carried no candidates".into(),
        })?;

        let content = candidate.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");
        let usage = parsed.usage_metadata.unwrap_or_default();

        Ok(InvokeOutcome {
            choice: Choice {
                content,
                tool_calls: Vec::new(),
                structured_output: None,
                finish_reason: finish_reason(candidate.finish_reason.as_deref()),
            },
            usage: Usage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
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
        let payload = self.convert_request(request);

        let response = self
            .client
            .post(self.url(model_id, true))
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
                    let parsed: Result<GoogleResponse, _> = serde_json::from_str(&event.data);
                    let parsed = match parsed {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    if let Some(u) = parsed.usage_metadata.clone() {
                        usage.prompt_tokens = u.prompt_token_count;
                        usage.completion_tokens = u.candidates_token_count;
                        usage.total_tokens = u.total_token_count;
                    }
                    if let Some(candidate) = parsed.candidates.into_iter().next() {
                        let content = candidate.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");
                        if !content.is_empty() {
                            yield Ok(StreamFrame::Delta { content, tool_call_fragment: None });
                        }
                        if let Some(reason) = candidate.finish_reason {
                            yield Ok(StreamFrame::Final {
                                choice: Choice {
                                    content: String::new(),
                                    tool_calls: Vec::new(),
                                    structured_output: None,
                                    finish_reason: finish_reason(Some(reason.as_str())),
                                },
                                usage: usage.clone(),
                            });
                        }
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
