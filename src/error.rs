//! Crate-level error taxonomy: one `thiserror` enum at the top, with
//! `#[from]` conversions collapsing each component's local error into a
//! `GatewayError` kind at the pipeline boundary.

use crate::domain::BudgetLevel;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("budget exhausted at {level} level")]
    BudgetExhausted { level: BudgetLevel },

    #[error("no candidate model satisfies the request's constraints")]
    NoCandidate,

    #[error("circuit open for provider {provider} region {region}")]
    CircuitOpen { provider: String, region: String },

    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    #[error("provider permanent error: {0}")]
    ProviderPermanent(String),

    #[error("provider filtered content: {0}")]
    ProviderContentFiltered(String),

    #[error("timeout during stage {stage}")]
    Timeout { stage: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("gateway overloaded")]
    Overloaded,

    #[error("safety blocked by filter {filter}: {categories:?}")]
    SafetyBlocked {
        filter: String,
        categories: Vec<String>,
    },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Kind tag used in error events and the user-visible failure payload.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::BudgetExhausted { .. } => "budget_exhausted",
            GatewayError::NoCandidate => "no_candidate",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::ProviderTransient(_) => "provider_transient",
            GatewayError::ProviderPermanent(_) => "provider_permanent",
            GatewayError::ProviderContentFiltered(_) => "provider_content_filtered",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::DeadlineExceeded => "deadline_exceeded",
            GatewayError::Overloaded => "overloaded",
            GatewayError::SafetyBlocked { .. } => "safety_blocked",
            GatewayError::CacheError(_) => "cache_error",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Whether the pipeline's Execute stage may advance to the next
    /// fallback candidate on this error.
    pub fn permits_fallback(&self) -> bool {
        matches!(
            self,
            GatewayError::ProviderTransient(_)
                | GatewayError::Timeout { .. }
                | GatewayError::RateLimited { .. }
                | GatewayError::CircuitOpen { .. }
        )
    }

    /// Whether this error is soft and should be swallowed with a warning
    /// rather than surfaced to the caller.
    pub fn is_soft(&self) -> bool {
        matches!(self, GatewayError::CacheError(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
