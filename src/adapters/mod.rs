//! Provider Adapter.
//!
//! A single `Adapter` trait, no inheritance, each implementation owning
//! its own wire-format table, streaming frame parser, error-mapping table
//! and token-counting strategy.

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod selfhosted;
pub mod sse;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{Choice, InferenceRequest, StreamFrame, Usage};

/// The error-mapping target every adapter normalizes provider-specific
/// status/error codes into. The pipeline acts on this classification,
/// never on a provider's raw code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("content filtered: {0}")]
    ContentFiltered(String),
    #[error("timeout")]
    Timeout,
    #[error("unknown error (permanent={permanent}): {message}")]
    Unknown { permanent: bool, message: String },
}

impl AdapterError {
    pub fn into_gateway_error(self) -> crate::error::GatewayError {
        use crate::error::GatewayError;
        match self {
            AdapterError::RateLimited { retry_after_ms } => {
                GatewayError::RateLimited { retry_after_ms }
            }
            AdapterError::Transient(msg) => GatewayError::ProviderTransient(msg),
            AdapterError::InvalidRequest(msg) => GatewayError::InvalidRequest(msg),
            AdapterError::AuthFailed => {
                GatewayError::ProviderPermanent("authentication failed".to_string())
            }
            AdapterError::ContentFiltered(msg) => GatewayError::ProviderContentFiltered(msg),
            AdapterError::Timeout => GatewayError::Timeout {
                stage: "execute".to_string(),
            },
            AdapterError::Unknown { permanent, message } => {
                if permanent {
                    GatewayError::ProviderPermanent(message)
                } else {
                    GatewayError::ProviderTransient(message)
                }
            }
        }
    }

    /// Whether this class should be recorded against the circuit breaker
    /// and adaptive rate-limit factor.
    pub fn is_monitored(&self) -> bool {
        matches!(
            self,
            AdapterError::RateLimited { .. } | AdapterError::Transient(_) | AdapterError::Timeout
        )
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub choice: Choice,
    pub usage: Usage,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub ok: bool,
    pub latency_ms: u64,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = AdapterResult<StreamFrame>> + Send>>;

/// Capability set exposed by every provider family.
///
/// Contract guarantees upheld by every implementation: (1) `invoke_stream`
/// emits a strictly ordered sequence of frames terminated by exactly one
/// `StreamFrame::Final` carrying usage; cancellation is the caller's
/// responsibility (drop the stream) at frame boundaries. (2) `invoke`
/// returns either a complete response or a typed `AdapterError`. (3) an
/// adapter never retries internally -- retries belong to the pipeline.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn invoke(
        &self,
        request: &InferenceRequest,
        model_id: &str,
        credential: &str,
    ) -> AdapterResult<InvokeOutcome>;

    async fn invoke_stream(
        &self,
        request: &InferenceRequest,
        model_id: &str,
        credential: &str,
    ) -> AdapterResult<FrameStream>;

    /// How many tokens `text` costs under this provider's family-specific
    /// tokenizer, matched to `model_id`'s prefix.
    fn count_tokens(&self, text: &str, model_id: &str) -> u32;

    async fn health_check(&self, credential: &str) -> AdapterResult<HealthCheckResult>;

    /// Optional provider-reported security/abuse signals surfaced
    /// alongside a response. Most providers never populate this.
    fn get_security_alerts(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Shared helper: classify an HTTP status into an `AdapterError`,
/// generalized across providers rather than duplicated per-family.
pub fn classify_http_status(status: u16, body: &str) -> AdapterError {
    match status {
        401 | 403 => AdapterError::AuthFailed,
        400 | 404 | 422 => AdapterError::InvalidRequest(body.to_string()),
        408 => AdapterError::Timeout,
        429 => AdapterError::RateLimited {
            retry_after_ms: None,
        },
        451 => AdapterError::ContentFiltered(body.to_string()),
        500..=599 => AdapterError::Transient(format!("http {status}: {body}")),
        _ => AdapterError::Unknown {
            permanent: false,
            message: format!("http {status}: {body}"),
        },
    }
}
