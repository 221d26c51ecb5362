// Model Gateway - Main HTTP Server
// The production server for provider-agnostic inference dispatch.
// Run with: cargo run --bin server

//! # Model Gateway Main Server Binary
//!
//! Assembles a [`model_gateway::pipeline::GatewayState`] from
//! [`model_gateway::config::GatewaySettings`], starts the background
//! circuit-breaker probe loop, and serves the HTTP API built in
//! `model_gateway::api`.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use dotenv::dotenv;
use tracing::{error, info, warn};

use model_gateway::adapters::{anthropic::AnthropicAdapter, google::GoogleAdapter, openai::OpenAiAdapter, Adapter};
use model_gateway::api::GatewayApiServerBuilder;
use model_gateway::auth::StaticPrincipalResolver;
use model_gateway::budget::BudgetEnforcer;
use model_gateway::cache::{ExactCache, SingleFlight};
use model_gateway::circuit::probe::ProbeLoop;
use model_gateway::circuit::{CircuitBreaker, CircuitParams};
use model_gateway::config::GatewaySettings;
use model_gateway::credentials::EnvCredentialResolver;
use model_gateway::domain::BudgetLevel;
use model_gateway::events::{EventEmitter, TracingEventEmitter};
use model_gateway::queue::{QueueThresholds, RequestQueue};
use model_gateway::rate_limiter::{AuthFailureLimiter, RateLimiter};
use model_gateway::registry::ModelRegistry;
use model_gateway::routing::RoutingEngine;
use model_gateway::safety::{prompt_injection_rules, SafetyFilter};
use model_gateway::pipeline::GatewayState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenv() {
        eprintln!("Warning: could not load .env file: {e}");
        eprintln!("Environment variables must be set manually or via system configuration");
    }

    tracing_subscriber::fmt().with_target(true).json().init();

    info!("starting model gateway server");

    let settings = GatewaySettings::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load gateway settings, falling back to defaults");
        GatewaySettings::default()
    });

    let emitter: Arc<dyn EventEmitter> = Arc::new(TracingEventEmitter);

    let circuit = Arc::new(CircuitBreaker::new(
        CircuitParams {
            failure_threshold: settings.circuit_breaker.failure_threshold,
            cooldown_seconds: settings.circuit_breaker.cooldown_seconds,
            success_threshold: settings.circuit_breaker.success_threshold,
            half_open_test_requests: settings.circuit_breaker.half_open_test_requests,
        },
        emitter.clone(),
    ));

    let registry = Arc::new(ModelRegistry::new(Vec::new()));
    let routing = Arc::new(RoutingEngine::new(circuit.clone()));
    let exact_cache = Arc::new(ExactCache::new(settings.cache.exact_cache_capacity));
    let single_flight = Arc::new(SingleFlight::new());
    let rate_limiter = Arc::new(RateLimiter::new());

    let budget = Arc::new(BudgetEnforcer::new(emitter.clone()));
    let default_daily_budget = settings
        .rate_limits
        .tiers
        .get("standard")
        .map(|t| t.daily_budget_cents)
        .unwrap_or(10_000.0);
    budget.set_limit(BudgetLevel::Org, "default", default_daily_budget);

    let mut adapters: HashMap<String, Arc<dyn Adapter>> = HashMap::new();
    let openai_base = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
    let anthropic_base = env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| "https://api.anthropic.com".to_string());
    let google_base = env::var("GOOGLE_BASE_URL").unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());

    adapters.insert("openai".to_string(), Arc::new(OpenAiAdapter::new(openai_base)));
    adapters.insert("anthropic".to_string(), Arc::new(AnthropicAdapter::new(anthropic_base)));
    adapters.insert("google".to_string(), Arc::new(GoogleAdapter::new(google_base)));

    if env::var("OPENAI_API_KEY").is_ok() {
        info!("openai api key configured");
    }
    if env::var("ANTHROPIC_API_KEY").is_ok() {
        info!("anthropic api key configured");
    }
    if env::var("GOOGLE_API_KEY").is_ok() {
        info!("google api key configured");
    }

    let credentials = Arc::new(EnvCredentialResolver::new());
    let principals = Arc::new(StaticPrincipalResolver::new());
    let auth_limiter = Arc::new(AuthFailureLimiter::new());

    let prompt_safety = Arc::new(SafetyFilter::new(prompt_injection_rules()));
    let response_safety = Arc::new(SafetyFilter::new(Vec::new()));

    let queue = Arc::new(RequestQueue::new(QueueThresholds::default()));

    let probe_loop = ProbeLoop::new(adapters.clone(), Vec::new(), circuit.clone(), credentials.clone());
    tokio::spawn(probe_loop.run());

    let state = Arc::new(GatewayState {
        registry,
        routing,
        exact_cache,
        semantic_cache: None,
        single_flight,
        rate_limiter,
        rate_limit_tiers: settings.rate_limits.tiers.clone(),
        budget,
        circuit,
        queue,
        adapters,
        credentials,
        principals,
        auth_limiter,
        prompt_safety,
        response_safety,
        emitter,
    });

    let server = GatewayApiServerBuilder::new()
        .with_port(settings.server.port)
        .with_host(settings.server.host.clone())
        .with_cors(true)
        .build(state);

    if let Err(e) = server.run().await {
        error!(error = %e, "model gateway server exited with an error");
        return Err(e.into());
    }

    Ok(())
}
