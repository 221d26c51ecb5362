// API module for the Model Gateway
// Exposes a single REST surface over the dispatcher: inference (sync and
// streaming), batch submission, model registry admin, cache control,
// budget overrides, and health/metrics.

pub mod batch;
pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::GatewayState;
use handlers::{
    batch_infer, get_batch_status, get_model, health_live, health_providers, health_ready, infer, infer_stream,
    invalidate_cache, list_models, metrics, not_found, override_budget, query_models, register_model,
    update_model_status, warm_cache, ApiState,
};

/// API server configuration.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub port: u16,
    pub host: String,
    pub cors_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_enabled: true,
        }
    }
}

/// Model Gateway HTTP server.
pub struct GatewayApiServer {
    config: ApiConfig,
    state: ApiState,
}

impl GatewayApiServer {
    pub fn new(config: ApiConfig, gateway: Arc<GatewayState>) -> Self {
        Self {
            config,
            state: ApiState::new(gateway),
        }
    }

    pub fn with_defaults(gateway: Arc<GatewayState>) -> Self {
        Self::new(ApiConfig::default(), gateway)
    }

    /// Build the Axum router with all gateway routes.
    pub fn create_router(&self) -> Router {
        let router = Router::new()
            // Inference
            .route("/v1/infer", post(infer))
            .route("/v1/infer/stream", post(infer_stream))
            // Batch
            .route("/v1/batch", post(batch_infer))
            .route("/v1/batch/:batch_id", get(get_batch_status))
            // Model registry
            .route("/v1/models", get(list_models).post(register_model))
            .route("/v1/models/query", post(query_models))
            .route("/v1/models/:model_id", get(get_model))
            .route("/v1/models/:model_id/status", post(update_model_status))
            // Cache control
            .route("/v1/cache/invalidate", post(invalidate_cache))
            .route("/v1/cache/warm", post(warm_cache))
            // Budget admin
            .route("/v1/budget/override", post(override_budget))
            // Health and metrics
            .route("/healthz/live", get(health_live))
            .route("/healthz/ready", get(health_ready))
            .route("/healthz/providers", get(health_providers))
            .route("/metrics", get(metrics))
            .with_state(self.state.clone())
            .fallback(not_found)
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("model gateway starting");
        info!(address = %addr, "binding http listener");
        info!("  POST http://{}/v1/infer", addr);
        info!("  POST http://{}/v1/infer/stream", addr);
        info!("  POST http://{}/v1/batch", addr);
        info!("  GET  http://{}/v1/models", addr);
        info!("  GET  http://{}/healthz/ready", addr);
        info!("  GET  http://{}/metrics", addr);

        axum::Server::bind(&addr.parse()?)
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

/// Builder for [`GatewayApiServer`].
pub struct GatewayApiServerBuilder {
    config: ApiConfig,
}

impl GatewayApiServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ApiConfig::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.config.host = host;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.config.cors_enabled = enabled;
        self
    }

    pub fn build(self, gateway: Arc<GatewayState>) -> GatewayApiServer {
        GatewayApiServer::new(self.config, gateway)
    }
}

impl Default for GatewayApiServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    async fn empty_gateway_state() -> Arc<GatewayState> {
        crate::pipeline::test_support::empty_state().await
    }

    #[tokio::test]
    async fn liveness_endpoint_always_ok() {
        let gateway = empty_gateway_state().await;
        let server = GatewayApiServer::with_defaults(gateway);
        let app = server.create_router();

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::GET)
                    .uri("/healthz/live")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_falls_back() {
        let gateway = empty_gateway_state().await;
        let server = GatewayApiServer::with_defaults(gateway);
        let app = server.create_router();

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::GET)
                    .uri("/v1/nonexistent")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn builder_sets_port_and_cors() {
        let gateway = empty_gateway_state().await;
        let server = GatewayApiServerBuilder::new()
            .with_port(9090)
            .with_cors(false)
            .build(gateway);

        assert_eq!(server.config.port, 9090);
        assert!(!server.config.cors_enabled);
    }
}
