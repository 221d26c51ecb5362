//! Pipeline / Dispatcher. A single stage sequence per request; each stage
//! can short-circuit with a typed error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::adapters::{Adapter, AdapterError};
use crate::auth::{Principal, PrincipalResolver};
use crate::budget::BudgetEnforcer;
use crate::cache::exact::cache_key;
use crate::cache::singleflight::{FlightResult, FlightRole};
use crate::cache::{ExactCache, SemanticCache, SingleFlight};
use crate::circuit::CircuitBreaker;
use crate::config::TierLimits;
use crate::credentials::CredentialResolver;
use crate::domain::{
    Candidate, CacheEntry, DecisionReason, InferenceRequest, InferenceResponse, Priority, StreamFrame, Tier, Usage,
};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{Event, EventEmitter, EventType};
use crate::queue::RequestQueue;
use crate::rate_limiter::{AuthFailureLimiter, RateLimiter};
use crate::registry::ModelRegistry;
use crate::routing::RoutingEngine;
use crate::safety::{Action, SafetyFilter};

const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_CAP_MS: u64 = 4_000;
const FRAME_CHANNEL_CAPACITY: usize = 32;
/// Cache entries written by the pipeline live a day; a real deployment
/// would source this per-category from configuration.
const DEFAULT_CACHE_TTL_HOURS: i64 = 24;

pub struct GatewayState {
    pub registry: Arc<ModelRegistry>,
    pub routing: Arc<RoutingEngine>,
    pub exact_cache: Arc<ExactCache>,
    pub semantic_cache: Option<Arc<SemanticCache>>,
    pub single_flight: Arc<SingleFlight>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit_tiers: HashMap<String, TierLimits>,
    pub budget: Arc<BudgetEnforcer>,
    pub circuit: Arc<CircuitBreaker>,
    pub queue: Arc<RequestQueue>,
    pub adapters: HashMap<String, Arc<dyn Adapter>>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub principals: Arc<dyn PrincipalResolver>,
    pub auth_limiter: Arc<AuthFailureLimiter>,
    pub prompt_safety: Arc<SafetyFilter>,
    pub response_safety: Arc<SafetyFilter>,
    pub emitter: Arc<dyn EventEmitter>,
}

impl GatewayState {
    /// Configured `TierLimits` for `tier`, falling back to the built-in
    /// default when the deployment's config has no entry for it.
    fn tier_limits(&self, tier: Tier) -> TierLimits {
        self.rate_limit_tiers.get(tier.as_str()).cloned().unwrap_or_default()
    }
}

/// Result of the Route+Execute+Post-process stages, before response
/// safety and finalization are applied. `candidate` is
/// empty when the outcome was adopted from a single-flight leader rather
/// than routed directly -- the leader's own result already carries the
/// cache-write responsibility, so a follower never writes back.
struct ExecutedOutcome {
    candidate: Candidate,
    choice: crate::domain::Choice,
    usage: Usage,
}

pub struct Dispatcher {
    state: Arc<GatewayState>,
}

impl Dispatcher {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    async fn emit(&self, event_type: EventType, correlation_id: &str, payload: serde_json::Value) {
        self.state
            .emitter
            .emit(Event::new(event_type, correlation_id.to_string(), payload, Utc::now()))
            .await;
    }

    /// Validate stage: check the auth-failure limiter, then authenticate.
    async fn validate(&self, bearer_token: &str, source_id: &str) -> GatewayResult<Principal> {
        if self.state.auth_limiter.is_blocked(bearer_token, source_id).await {
            return Err(GatewayError::Unauthorized("principal or source is currently frozen".into()));
        }

        match self.state.principals.authenticate(bearer_token).await {
            Ok(principal) => Ok(principal),
            Err(err) => {
                let triggered = self.state.auth_limiter.record_failure(bearer_token, source_id).await;
                if triggered {
                    self.emit(EventType::SecurityAuthFreeze, bearer_token, serde_json::json!({"source_id": source_id}))
                        .await;
                }
                Err(err)
            }
        }
    }

    fn estimate_input_tokens(&self, request: &InferenceRequest) -> u32 {
        let text = request.prompt.semantic_key_text();
        self.state
            .adapters
            .values()
            .next()
            .map(|a| a.count_tokens(&text, ""))
            .unwrap_or((text.len() / 4) as u32)
    }

    /// Runs the full non-streaming pipeline: validate, estimate tokens,
    /// rate-limit, cache lookup, route/execute/post-process, budget debit,
    /// finalize.
    pub async fn dispatch(
        &self,
        request: InferenceRequest,
        bearer_token: &str,
        source_id: &str,
    ) -> GatewayResult<InferenceResponse> {
        self.emit(EventType::ModelRequestSubmitted, &request.request_id, serde_json::json!({})).await;

        // 1. Validate.
        let principal = self.validate(bearer_token, source_id).await?;

        // 1b. Admission control ahead of routing.
        self.state.queue.admit(priority_for(request.latency_class)).await?;

        // 2. Prompt safety.
        let prompt_outcome = self.state.prompt_safety.evaluate(&request.prompt.semantic_key_text()).await;
        if prompt_outcome.action == Action::Block {
            return Err(GatewayError::SafetyBlocked {
                filter: "prompt".into(),
                categories: prompt_outcome.matched_categories,
            });
        }

        // 3. Rate limit (pre-routing; scoped to the principal, the model
        // not yet being known).
        let estimated_tokens = self.estimate_input_tokens(&request);
        let limits = self.state.tier_limits(principal.tier);
        self.state
            .rate_limiter
            .acquire(
                &principal.principal_id,
                "pre-route",
                principal.tier,
                limits.requests_per_minute as f64,
                limits.tokens_per_minute as f64,
                limits.burst_multiplier,
                "unknown",
                "unknown",
                estimated_tokens as f64,
            )
            .await?;

        // 4. Budget check.
        let org_key = principal.organization_id.clone().unwrap_or_default();
        let project_key = principal.project_id.clone().unwrap_or_default();
        let reservation = self
            .state
            .budget
            .check_and_reserve(&org_key, &project_key, &principal.principal_id, request.token_budget.max_cost_cents)
            .await?;

        let key = cache_key(&request.prompt);

        // 5. Cache lookup.
        if request.routing_hints.cache_enabled {
            if let Some(entry) = self.state.exact_cache.get(&key).await {
                self.state.budget.release(reservation).await;
                self.emit(EventType::ModelCacheHit, &request.request_id, serde_json::json!({"cache_type": "exact"})).await;
                self.emit(EventType::ModelResponseReceived, &request.request_id, serde_json::json!({"cache_hit": true})).await;
                self.emit(EventType::ModelCostIncurred, &request.request_id, serde_json::json!({"cost_cents": 0.0})).await;
                return Ok(response_from_cache(&request, &entry));
            }

            if let Some(semantic) = &self.state.semantic_cache {
                let embedding = semantic.embed_query(&request.prompt).await;
                let category = request.routing_hints.task_type.as_deref();
                if let Some((similarity, entry)) = semantic.search(&embedding, category) {
                    self.state.budget.release(reservation).await;
                    self.emit(
                        EventType::ModelCacheHit,
                        &request.request_id,
                        serde_json::json!({"cache_type": "semantic", "similarity_score": similarity}),
                    )
                    .await;
                    self.emit(EventType::ModelResponseReceived, &request.request_id, serde_json::json!({"cache_hit": true})).await;
                    self.emit(EventType::ModelCostIncurred, &request.request_id, serde_json::json!({"cost_cents": 0.0})).await;
                    return Ok(response_from_cache(&request, &entry));
                }
            }

            self.emit(EventType::ModelCacheMiss, &request.request_id, serde_json::json!({})).await;
        }

        // Route, execute with fallback, post-process -- coordinated
        // through single-flight so concurrent misses on the same key share
        // one upstream call.
        let executed = if request.routing_hints.cache_enabled {
            match self.state.single_flight.join(&key) {
                FlightRole::Leader => {
                    let result = self.route_execute_postprocess(&request, estimated_tokens).await;
                    match &result {
                        Ok(outcome) => self.state.single_flight.complete(
                            &key,
                            FlightResult {
                                choice: outcome.choice.clone(),
                                usage: outcome.usage.clone(),
                            },
                        ),
                        Err(err) => self.state.single_flight.fail(&key, err.to_string()),
                    }
                    result
                }
                FlightRole::Follower(rx) => {
                    let remaining = request.remaining_budget_ms(Utc::now()).max(0) as u64;
                    let flight_result = SingleFlight::await_follower(rx, Duration::from_millis(remaining)).await?;
                    Ok(ExecutedOutcome {
                        candidate: Candidate {
                            model_id: String::new(),
                            provider_id: String::new(),
                            region: String::new(),
                        },
                        choice: flight_result.choice,
                        usage: flight_result.usage,
                    })
                }
            }
        } else {
            self.route_execute_postprocess(&request, estimated_tokens).await
        };

        let executed = match executed {
            Ok(e) => e,
            Err(err) => {
                self.state.budget.release(reservation).await;
                return Err(err);
            }
        };

        // 9. Response safety.
        let response_outcome = self.state.response_safety.evaluate(&executed.choice.content).await;
        let mut final_choice = executed.choice;
        if response_outcome.action == Action::Block {
            self.state.budget.settle(&reservation, executed.usage.cost_cents).await;
            return Err(GatewayError::SafetyBlocked {
                filter: "response".into(),
                categories: response_outcome.matched_categories,
            });
        }
        if response_outcome.action == Action::Filter {
            final_choice.content = "[redacted by response safety filter]".to_string();
        }

        // 10. Finalize.
        self.state.budget.settle(&reservation, executed.usage.cost_cents).await;
        self.emit(EventType::ModelCostIncurred, &request.request_id, serde_json::json!({"cost_cents": executed.usage.cost_cents})).await;

        // A follower's ExecutedOutcome carries an empty candidate since the
        // leader already owns the cache write for this key.
        if request.routing_hints.cache_enabled && response_outcome.action != Action::Block && !executed.candidate.provider_id.is_empty() {
            let now = Utc::now();
            let entry = CacheEntry {
                cache_key: key.clone(),
                embedding: None,
                category: request.routing_hints.task_type.clone(),
                provider_id: executed.candidate.provider_id.clone(),
                model_id: executed.candidate.model_id.clone(),
                choice: final_choice.clone(),
                usage: executed.usage.clone(),
                created_at: now,
                expires_at: now + chrono::Duration::hours(DEFAULT_CACHE_TTL_HOURS),
                hit_count: 0,
            };
            let _ = self.state.exact_cache.put(entry.clone()).await;
            if let Some(semantic) = &self.state.semantic_cache {
                let embedding = semantic.embed_query(&request.prompt).await;
                semantic.insert(CacheEntry {
                    embedding: Some(embedding),
                    ..entry
                });
            }
        }

        self.emit(EventType::ModelResponseReceived, &request.request_id, serde_json::json!({"cache_hit": false})).await;

        Ok(InferenceResponse {
            request_id: request.request_id,
            provider_id: executed.candidate.provider_id,
            model_id: executed.candidate.model_id,
            region: executed.candidate.region,
            choice: final_choice,
            usage: executed.usage,
            cache_hit: false,
            created_at: Utc::now(),
        })
    }

    /// Routes, executes with retry/fallback, and fills in cost accounting
    /// the provider didn't already report.
    async fn route_execute_postprocess(&self, request: &InferenceRequest, estimated_tokens: u32) -> GatewayResult<ExecutedOutcome> {
        let snapshot = self.state.registry.snapshot().await;
        let decision = self.state.routing.select(request, &snapshot, estimated_tokens).await?;

        let attempt_order: Vec<Candidate> = decision.attempt_order().into_iter().cloned().collect();
        let (candidate, outcome) = self.execute_with_fallback(request, &attempt_order).await?;

        let fell_back = candidate.provider_id != decision.selected.provider_id
            || candidate.model_id != decision.selected.model_id
            || candidate.region != decision.selected.region;
        let routing_reason = if fell_back { DecisionReason::Fallback } else { decision.reason };

        self.emit(
            EventType::ModelRequestRouted,
            &request.request_id,
            serde_json::json!({
                "selected_provider": candidate.provider_id,
                "routing_reason": format!("{:?}", routing_reason),
            }),
        )
        .await;

        let mut usage = outcome.usage;
        if usage.cost_cents == 0.0 && usage.total_tokens > 0 {
            if let Some(model) = snapshot.get(&candidate.model_id) {
                usage.cost_cents = (usage.total_tokens as f64 / 1_000_000.0) * model.effective_cost_per_million();
            }
        }

        Ok(ExecutedOutcome {
            candidate,
            choice: outcome.choice,
            usage,
        })
    }

    /// Retry/fallback policy, driven by error classification: retryable
    /// errors get a bounded number of in-place retries against the same
    /// candidate before the next candidate in `attempt_order` is tried;
    /// errors that don't permit fallback abort immediately.
    async fn execute_with_fallback(
        &self,
        request: &InferenceRequest,
        attempt_order: &[Candidate],
    ) -> GatewayResult<(Candidate, crate::adapters::InvokeOutcome)> {
        let mut retries_used = 0u32;
        let mut last_error: Option<GatewayError> = None;

        for candidate in attempt_order {
            if self.state.circuit.is_usable(&candidate.provider_id, &candidate.region).await.is_err() {
                last_error = Some(GatewayError::CircuitOpen {
                    provider: candidate.provider_id.clone(),
                    region: candidate.region.clone(),
                });
                continue;
            }

            let Some(adapter) = self.state.adapters.get(&candidate.provider_id) else {
                last_error = Some(GatewayError::Internal(format!("no adapter registered for {}", candidate.provider_id)));
                continue;
            };

            let credential = match self.state.credentials.resolve(&candidate.provider_id).await {
                Ok(c) => c,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };

            let outcome = loop {
                match adapter.invoke(request, &candidate.model_id, &credential).await {
                    Ok(outcome) => {
                        self.state.circuit.record_success(&candidate.provider_id, &candidate.region).await;
                        break Some(outcome);
                    }
                    Err(adapter_error) => {
                        self.state.circuit.record_failure(&candidate.provider_id, &candidate.region, &adapter_error).await;
                        if matches!(adapter_error, AdapterError::RateLimited { .. }) {
                            self.state.rate_limiter.adaptive().record_429(&candidate.provider_id, &candidate.region).await;
                        }

                        self.emit(
                            EventType::ModelProviderFailed,
                            &request.request_id,
                            serde_json::json!({"provider": candidate.provider_id, "error_type": error_type_tag(&adapter_error)}),
                        )
                        .await;

                        let retryable = matches!(adapter_error, AdapterError::Transient(_) | AdapterError::Timeout);
                        if retryable && retries_used < MAX_RETRIES {
                            retries_used += 1;
                            tokio::time::sleep(backoff_with_jitter(retries_used)).await;
                            continue;
                        }

                        last_error = Some(adapter_error.into_gateway_error());
                        break None;
                    }
                }
            };

            if let Some(outcome) = outcome {
                return Ok((candidate.clone(), outcome));
            }

            if let Some(err) = &last_error {
                if !err.permits_fallback() {
                    return Err(err.clone());
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NoCandidate))
    }

    /// Streaming variant: validate/estimate/rate-limit/route identical to
    /// `dispatch`, frame forwarding over a bounded channel, deadline-aware
    /// termination.
    pub async fn dispatch_stream(
        &self,
        request: InferenceRequest,
        bearer_token: &str,
        source_id: &str,
    ) -> GatewayResult<ReceiverStream<StreamFrame>> {
        let principal = self.validate(bearer_token, source_id).await?;

        self.state.queue.admit(priority_for(request.latency_class)).await?;

        let prompt_outcome = self.state.prompt_safety.evaluate(&request.prompt.semantic_key_text()).await;
        if prompt_outcome.action == Action::Block {
            return Err(GatewayError::SafetyBlocked {
                filter: "prompt".into(),
                categories: prompt_outcome.matched_categories,
            });
        }

        let estimated_tokens = self.estimate_input_tokens(&request);
        let limits = self.state.tier_limits(principal.tier);
        self.state
            .rate_limiter
            .acquire(
                &principal.principal_id,
                "pre-route",
                principal.tier,
                limits.requests_per_minute as f64,
                limits.tokens_per_minute as f64,
                limits.burst_multiplier,
                "unknown",
                "unknown",
                estimated_tokens as f64,
            )
            .await?;

        let org_key = principal.organization_id.clone().unwrap_or_default();
        let project_key = principal.project_id.clone().unwrap_or_default();
        let reservation = self
            .state
            .budget
            .check_and_reserve(&org_key, &project_key, &principal.principal_id, request.token_budget.max_cost_cents)
            .await?;

        let snapshot = self.state.registry.snapshot().await;
        let decision = match self.state.routing.select(&request, &snapshot, estimated_tokens).await {
            Ok(d) => d,
            Err(err) => {
                self.state.budget.release(reservation).await;
                return Err(err);
            }
        };

        let candidate = decision.selected.clone();
        let Some(adapter) = self.state.adapters.get(&candidate.provider_id).cloned() else {
            self.state.budget.release(reservation).await;
            return Err(GatewayError::Internal(format!("no adapter registered for {}", candidate.provider_id)));
        };
        let credential = match self.state.credentials.resolve(&candidate.provider_id).await {
            Ok(c) => c,
            Err(err) => {
                self.state.budget.release(reservation).await;
                return Err(err);
            }
        };

        let upstream = match adapter.invoke_stream(&request, &candidate.model_id, &credential).await {
            Ok(s) => s,
            Err(err) => {
                self.state.circuit.record_failure(&candidate.provider_id, &candidate.region, &err).await;
                self.state.budget.release(reservation).await;
                return Err(err.into_gateway_error());
            }
        };

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let state = self.state.clone();
        let request_id = request.request_id.clone();
        let deadline = request.deadline;
        let provider_id = candidate.provider_id.clone();
        let region = candidate.region.clone();

        tokio::spawn(async move {
            use futures::StreamExt;
            let mut upstream = upstream;
            loop {
                let remaining = (deadline - Utc::now()).num_milliseconds().max(0) as u64;
                let next = tokio::time::timeout(Duration::from_millis(remaining), upstream.next()).await;
                let frame = match next {
                    Err(_) => {
                        let _ = tx
                            .send(StreamFrame::Error {
                                kind: "deadline_exceeded".into(),
                                message: "stream deadline exceeded".into(),
                            })
                            .await;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(adapter_error))) => {
                        state.circuit.record_failure(&provider_id, &region, &adapter_error).await;
                        let gateway_error = adapter_error.into_gateway_error();
                        let _ = tx
                            .send(StreamFrame::Error {
                                kind: gateway_error.kind().to_string(),
                                message: gateway_error.to_string(),
                            })
                            .await;
                        break;
                    }
                    Ok(Some(Ok(frame))) => frame,
                };

                let is_final = matches!(frame, StreamFrame::Final { .. });
                if tx.send(frame).await.is_err() {
                    break;
                }
                if is_final {
                    state.circuit.record_success(&provider_id, &region).await;
                    break;
                }
            }
            state.budget.release(reservation).await;
            state
                .emitter
                .emit(Event::new(
                    EventType::ModelResponseReceived,
                    request_id,
                    serde_json::json!({"cache_hit": false, "streaming": true}),
                    Utc::now(),
                ))
                .await;
        });

        Ok(ReceiverStream::new(rx))
    }
}

fn response_from_cache(request: &InferenceRequest, entry: &CacheEntry) -> InferenceResponse {
    InferenceResponse {
        request_id: request.request_id.clone(),
        provider_id: entry.provider_id.clone(),
        model_id: entry.model_id.clone(),
        region: String::new(),
        choice: entry.choice.clone(),
        usage: Usage {
            cost_cents: 0.0,
            ..entry.usage.clone()
        },
        cache_hit: true,
        created_at: Utc::now(),
    }
}

fn priority_for(latency_class: crate::domain::LatencyClass) -> Priority {
    use crate::domain::LatencyClass;
    match latency_class {
        LatencyClass::Realtime => Priority::Realtime,
        LatencyClass::Interactive => Priority::Interactive,
        LatencyClass::Batch => Priority::Batch,
    }
}

fn error_type_tag(error: &AdapterError) -> &'static str {
    match error {
        AdapterError::RateLimited { .. } => "rate_limited",
        AdapterError::Transient(_) => "transient",
        AdapterError::InvalidRequest(_) => "invalid_request",
        AdapterError::AuthFailed => "auth_failed",
        AdapterError::ContentFiltered(_) => "content_filtered",
        AdapterError::Timeout => "timeout",
        AdapterError::Unknown { .. } => "unknown",
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    let capped = base.min(BACKOFF_CAP_MS);
    let jitter_range = (capped as f64 * 0.2) as i64;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    Duration::from_millis((capped as i64 + jitter).max(0) as u64)
}

/// Minimal `GatewayState` construction for tests that only exercise the
/// HTTP surface's routing and error-mapping, not live provider dispatch.
#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::auth::StaticPrincipalResolver;
    use crate::budget::BudgetEnforcer;
    use crate::cache::{ExactCache, SingleFlight};
    use crate::circuit::{CircuitBreaker, CircuitParams};
    use crate::credentials::EnvCredentialResolver;
    use crate::events::{EventEmitter, TracingEventEmitter};
    use crate::queue::{QueueThresholds, RequestQueue};
    use crate::rate_limiter::RateLimiter;
    use crate::registry::ModelRegistry;
    use crate::routing::RoutingEngine;
    use crate::safety::SafetyFilter;

    use super::GatewayState;

    pub async fn empty_state() -> Arc<GatewayState> {
        let emitter: Arc<dyn EventEmitter> = Arc::new(TracingEventEmitter);
        let circuit = Arc::new(CircuitBreaker::new(CircuitParams::default(), emitter.clone()));
        Arc::new(GatewayState {
            registry: Arc::new(ModelRegistry::new(Vec::new())),
            routing: Arc::new(RoutingEngine::new(circuit.clone())),
            exact_cache: Arc::new(ExactCache::new(1_000)),
            semantic_cache: None,
            single_flight: Arc::new(SingleFlight::new()),
            rate_limiter: Arc::new(RateLimiter::new()),
            rate_limit_tiers: HashMap::new(),
            budget: Arc::new(BudgetEnforcer::new(emitter.clone())),
            circuit,
            queue: Arc::new(RequestQueue::new(QueueThresholds::default())),
            adapters: HashMap::new(),
            credentials: Arc::new(EnvCredentialResolver::new()),
            principals: Arc::new(StaticPrincipalResolver::new()),
            auth_limiter: Arc::new(crate::rate_limiter::AuthFailureLimiter::new()),
            prompt_safety: Arc::new(SafetyFilter::new(Vec::new())),
            response_safety: Arc::new(SafetyFilter::new(Vec::new())),
            emitter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_cap_plus_jitter() {
        for attempt in 1..=5 {
            let backoff = backoff_with_jitter(attempt);
            assert!(backoff.as_millis() <= (BACKOFF_CAP_MS as f64 * 1.2) as u128);
        }
    }
}
