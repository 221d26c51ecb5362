//! Configuration surface.
//!
//! `config` + `dotenv` layering: a base `gateway.toml` (or
//! `config/default.toml`) is overridden by `GATEWAY_`-prefixed environment
//! variables, and the result is deserialized into [`GatewaySettings`], the
//! validated
//! snapshot the rest of the gateway is built from.

use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TierLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub daily_budget_cents: f64,
    pub burst_multiplier: f64,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 100_000,
            daily_budget_cents: 10_000.0,
            burst_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierLimits>,
}

fn default_tiers() -> HashMap<String, TierLimits> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "free".to_string(),
        TierLimits {
            requests_per_minute: 20,
            tokens_per_minute: 20_000,
            daily_budget_cents: 500.0,
            burst_multiplier: 1.0,
        },
    );
    tiers.insert("standard".to_string(), TierLimits::default());
    tiers.insert(
        "premium".to_string(),
        TierLimits {
            requests_per_minute: 600,
            tokens_per_minute: 1_000_000,
            daily_budget_cents: 100_000.0,
            burst_multiplier: 2.0,
        },
    );
    tiers
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { tiers: default_tiers() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemanticCacheSettings {
    pub embedding_model: String,
    pub default_similarity_threshold: f32,
    #[serde(default)]
    pub category_thresholds: HashMap<String, f32>,
    pub ttl_seconds: u64,
    pub max_entries: u64,
    #[serde(default)]
    pub min_response_chars: usize,
}

impl Default for SemanticCacheSettings {
    fn default() -> Self {
        Self {
            embedding_model: "local-cosine-v1".to_string(),
            default_similarity_threshold: 0.85,
            category_thresholds: HashMap::new(),
            ttl_seconds: 3600,
            max_entries: 50_000,
            min_response_chars: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub semantic_cache: SemanticCacheSettings,
    #[serde(default = "default_exact_cache_capacity")]
    pub exact_cache_capacity: u64,
}

fn default_exact_cache_capacity() -> u64 {
    100_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            semantic_cache: SemanticCacheSettings::default(),
            exact_cache_capacity: default_exact_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSettings {
    pub default_strategy: String,
    #[serde(default)]
    pub fallback_chains: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub latency_class_thresholds: HashMap<String, u64>,
    #[serde(default)]
    pub agent_overrides: HashMap<String, String>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_strategy: "cost_optimized".to_string(),
            fallback_chains: HashMap::new(),
            latency_class_thresholds: HashMap::new(),
            agent_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_seconds: i64,
    pub success_threshold: u32,
    #[serde(default)]
    pub monitored_errors: Vec<String>,
    pub timeout_ms: u64,
    #[serde(default = "default_half_open_test_requests")]
    pub half_open_test_requests: u32,
}

fn default_half_open_test_requests() -> u32 {
    1
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 60,
            success_threshold: 3,
            monitored_errors: vec!["rate_limited".into(), "transient".into(), "timeout".into()],
            timeout_ms: 30_000,
            half_open_test_requests: default_half_open_test_requests(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveLimitingSettings {
    pub enabled: bool,
    pub reduction_factor: f64,
    pub recovery_rate_per_minute: f64,
    pub minimum_factor: f64,
}

impl Default for AdaptiveLimitingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reduction_factor: 0.5,
            recovery_rate_per_minute: 0.05,
            minimum_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalModerationSettings {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub fallback_action: String,
}

impl Default for ExternalModerationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 500,
            fallback_action: "allow".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseSafetySettings {
    pub mode: String,
    #[serde(default)]
    pub categories: HashMap<String, bool>,
    #[serde(default)]
    pub external_moderation: ExternalModerationSettings,
}

impl Default for ResponseSafetySettings {
    fn default() -> Self {
        Self {
            mode: "filter".to_string(),
            categories: HashMap::new(),
            external_moderation: ExternalModerationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// The validated configuration snapshot the rest of the gateway is built
/// from.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewaySettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub adaptive_limiting: AdaptiveLimitingSettings,
    #[serde(default)]
    pub response_safety: ResponseSafetySettings,
}

impl GatewaySettings {
    /// Layers `gateway.toml` (if present), falls back to
    /// `config/default.toml`, then applies `GATEWAY_`-prefixed
    /// environment overrides (`GATEWAY_SERVER__PORT=9090`, etc). Callers
    /// are expected to have already called `dotenv().ok()` so overrides
    /// sourced from a `.env` file are visible as process env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("gateway").required(false))
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("GATEWAY").separator("__"));

        builder.build()?.try_deserialize()
    }
}
