//! HTTP handlers for the gateway's RPC surface.
//!
//! `State`-extraction per handler, a shared error-to-HTTP-status mapping,
//! and an SSE path for streaming built on `axum::response::sse::Sse` over
//! the dispatcher's own `StreamFrame` channel.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures::{Stream, StreamExt};

use crate::domain::Capability;
use crate::error::GatewayError;
use crate::pipeline::{Dispatcher, GatewayState};

use super::batch::{self, BatchStore};
use super::types::{
    BatchAcceptedResponse, BatchInferRequest, BatchStatusResponse, BudgetOverrideRequest,
    BudgetOverrideResponse, CacheInvalidateRequest, CacheWarmRequest, CacheWarmResponse, ErrorResponse,
    InferRequestBody, LivenessResponse, MetricsSnapshot, ModelQueryRequest, ModelsResponse, ProviderHealth,
    ProviderHealthResponse, ReadinessResponse, UpdateModelStatusRequest,
};

/// Shared application state for the gateway's HTTP surface.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<GatewayState>,
    pub dispatcher: Arc<Dispatcher>,
    pub batches: Arc<BatchStore>,
}

impl ApiState {
    pub fn new(gateway: Arc<GatewayState>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(gateway.clone()));
        Self {
            gateway,
            dispatcher,
            batches: Arc::new(BatchStore::new()),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, (StatusCode, Json<ErrorResponse>)> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| error_response(&GatewayError::Unauthorized("missing bearer token".into())))
}

fn source_id(headers: &HeaderMap) -> String {
    headers
        .get("x-source-id")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

fn status_for(error: &GatewayError) -> StatusCode {
    match error.kind() {
        "invalid_request" => StatusCode::BAD_REQUEST,
        "unauthorized" => StatusCode::UNAUTHORIZED,
        "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
        "budget_exhausted" => StatusCode::PAYMENT_REQUIRED,
        "no_candidate" | "circuit_open" | "overloaded" => StatusCode::SERVICE_UNAVAILABLE,
        "provider_transient" | "timeout" | "deadline_exceeded" => StatusCode::GATEWAY_TIMEOUT,
        "provider_permanent" | "internal" => StatusCode::INTERNAL_SERVER_ERROR,
        "provider_content_filtered" | "safety_blocked" => StatusCode::UNPROCESSABLE_ENTITY,
        "cache_error" => StatusCode::INTERNAL_SERVER_ERROR,
        "cancelled" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    (status_for(error), Json(ErrorResponse::from_gateway_error(error)))
}

pub async fn infer(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<InferRequestBody>,
) -> Result<Json<crate::domain::InferenceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = bearer_token(&headers)?;
    let source = source_id(&headers);
    let request = body.into_domain(Utc::now());

    state
        .dispatcher
        .dispatch(request, token, &source)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

pub async fn infer_stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<InferRequestBody>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    let token = bearer_token(&headers)?.to_string();
    let source = source_id(&headers);
    let request = body.into_domain(Utc::now());

    let frames = state
        .dispatcher
        .dispatch_stream(request, &token, &source)
        .await
        .map_err(|e| error_response(&e))?;

    let events = frames.map(|frame| {
        let event = SseEvent::default()
            .json_data(&frame)
            .unwrap_or_else(|_| SseEvent::default().data("{\"error\":\"frame serialization failed\"}"));
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn batch_infer(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<BatchInferRequest>,
) -> Result<Json<BatchAcceptedResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = bearer_token(&headers)?.to_string();
    let source = source_id(&headers);
    let batch_id = crate::domain::request::new_request_id();
    let total = body.requests.len();
    state.batches.create(batch_id.clone(), total);

    let dispatcher = state.dispatcher.clone();
    let batches = state.batches.clone();
    let batch_id_for_task = batch_id.clone();
    let now = Utc::now();

    tokio::spawn(async move {
        for item in body.requests {
            let request = item.into_domain(now);
            let request_id = request.request_id.clone();
            let result = dispatcher.dispatch(request, &token, &source).await;
            let record = match result {
                Ok(response) => batch::ok_item(response),
                Err(err) => batch::error_item(request_id, &err),
            };
            batches.push_result(&batch_id_for_task, record).await;
        }
    });

    Ok(Json(BatchAcceptedResponse { batch_id, total }))
}

pub async fn get_batch_status(
    State(state): State<ApiState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .batches
        .status(&batch_id)
        .await
        .map(Json)
        .ok_or_else(|| error_response(&GatewayError::InvalidRequest(format!("no batch {batch_id}"))))
}

pub async fn list_models(State(state): State<ApiState>) -> Json<ModelsResponse> {
    let snapshot = state.gateway.registry.snapshot().await;
    Json(ModelsResponse {
        models: snapshot.all().into_iter().cloned().collect(),
    })
}

pub async fn get_model(
    State(state): State<ApiState>,
    Path(model_id): Path<String>,
) -> Result<Json<crate::domain::ModelDefinition>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state.gateway.registry.snapshot().await;
    snapshot
        .get(&model_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| error_response(&GatewayError::InvalidRequest(format!("unknown model {model_id}"))))
}

pub async fn query_models(
    State(state): State<ApiState>,
    Json(query): Json<ModelQueryRequest>,
) -> Json<ModelsResponse> {
    let snapshot = state.gateway.registry.snapshot().await;
    let caps: std::collections::HashSet<Capability> = query.required_capabilities;
    let models = snapshot
        .find(
            &caps,
            query.min_context,
            query.allowed_regions.as_ref(),
            &query.excluded_providers,
        )
        .into_iter()
        .cloned()
        .collect();
    Json(ModelsResponse { models })
}

pub async fn register_model(
    State(state): State<ApiState>,
    Json(model): Json<crate::domain::ModelDefinition>,
) -> StatusCode {
    state.gateway.registry.register(model).await;
    StatusCode::CREATED
}

pub async fn update_model_status(
    State(state): State<ApiState>,
    Path(model_id): Path<String>,
    Json(body): Json<UpdateModelStatusRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let updated = state.gateway.registry.set_status(&model_id, body.status).await;
    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(&GatewayError::InvalidRequest(format!(
            "unknown model {model_id}"
        ))))
    }
}

pub async fn invalidate_cache(State(state): State<ApiState>, Json(body): Json<CacheInvalidateRequest>) -> StatusCode {
    if let Some(prefix) = &body.prefix {
        state.gateway.exact_cache.invalidate_prefix(prefix).await;
        if let Some(semantic) = &state.gateway.semantic_cache {
            semantic.invalidate_prefix(prefix);
        }
    } else if let Some(key) = &body.cache_key {
        state.gateway.exact_cache.invalidate(key).await;
        if let Some(semantic) = &state.gateway.semantic_cache {
            semantic.invalidate(key);
        }
    }
    StatusCode::NO_CONTENT
}

pub async fn warm_cache(
    State(state): State<ApiState>,
    Json(body): Json<CacheWarmRequest>,
) -> Result<Json<CacheWarmResponse>, (StatusCode, Json<ErrorResponse>)> {
    let cache_key = crate::cache::exact::cache_key(&body.prompt);
    let now = Utc::now();
    let entry = crate::domain::CacheEntry {
        cache_key: cache_key.clone(),
        embedding: None,
        category: body.category.clone(),
        provider_id: body.provider_id,
        model_id: body.model_id,
        choice: body.choice,
        usage: body.usage,
        created_at: now,
        expires_at: now + chrono::Duration::seconds(body.ttl_seconds),
        hit_count: 0,
    };

    state
        .gateway
        .exact_cache
        .put(entry.clone())
        .await
        .map_err(|e| error_response(&GatewayError::from(e)))?;

    if let Some(semantic) = &state.gateway.semantic_cache {
        let embedding = semantic.embed_query(&body.prompt).await;
        semantic.insert(crate::domain::CacheEntry {
            embedding: Some(embedding),
            ..entry
        });
    }

    Ok(Json(CacheWarmResponse { cache_key }))
}

pub async fn override_budget(
    State(state): State<ApiState>,
    Json(body): Json<BudgetOverrideRequest>,
) -> Result<Json<BudgetOverrideResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .gateway
        .budget
        .override_budget(body.level, &body.key, body.amount_cents)
        .await
        .map(|remaining_cents| {
            Json(BudgetOverrideResponse {
                level: body.level,
                key: body.key.clone(),
                remaining_cents,
            })
        })
        .ok_or_else(|| {
            error_response(&GatewayError::InvalidRequest(format!(
                "no budget configured at {} level for key {}",
                body.level, body.key
            )))
        })
}

pub async fn health_live() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "ok" })
}

pub async fn health_ready(State(state): State<ApiState>) -> Json<ReadinessResponse> {
    let snapshot = state.gateway.registry.snapshot().await;
    Json(ReadinessResponse {
        status: "ok",
        registered_models: snapshot.len(),
        registered_adapters: state.gateway.adapters.len(),
    })
}

pub async fn health_providers(State(state): State<ApiState>) -> Json<ProviderHealthResponse> {
    let snapshot = state.gateway.registry.snapshot().await;
    let mut providers = Vec::new();
    for (provider_id, region) in snapshot.provider_regions() {
        let circuit = state.gateway.circuit.snapshot(&provider_id, &region).await;
        providers.push(ProviderHealth {
            provider_id,
            region,
            circuit,
        });
    }
    Json(ProviderHealthResponse { providers })
}

pub async fn metrics(State(state): State<ApiState>) -> Json<MetricsSnapshot> {
    let snapshot = state.gateway.registry.snapshot().await;
    let budget_snapshot: HashMap<String, f64> = state
        .gateway
        .budget
        .snapshot()
        .await
        .into_iter()
        .map(|((level, key), remaining)| (format!("{level}:{key}"), remaining))
        .collect();

    Json(MetricsSnapshot {
        registered_models: snapshot.len(),
        exact_cache_entries: state.gateway.exact_cache.entry_count(),
        semantic_cache_entries: state.gateway.semantic_cache.as_ref().map(|c| c.len()),
        budget_snapshot,
    })
}

pub async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    error_response(&GatewayError::InvalidRequest("no such route".into()))
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-abc123"));
        assert_eq!(bearer_token(&headers).unwrap(), "sk-abc123");
    }

    #[test]
    fn bearer_token_missing_is_unauthorized() {
        let headers = HeaderMap::new();
        let (status, _) = bearer_token(&headers).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn source_id_prefers_explicit_header_over_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-source-id", HeaderValue::from_static("agent-7"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(source_id(&headers), "agent-7");
    }

    #[test]
    fn source_id_falls_back_to_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(source_id(&headers), "unknown");
    }

    #[test]
    fn status_for_maps_rate_limited_to_429() {
        let err = GatewayError::RateLimited { retry_after_ms: Some(500) };
        assert_eq!(status_for(&err), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn status_for_maps_budget_exhausted_to_402() {
        let err = GatewayError::BudgetExhausted {
            level: crate::domain::BudgetLevel::Org,
        };
        assert_eq!(status_for(&err), StatusCode::PAYMENT_REQUIRED);
    }
}
