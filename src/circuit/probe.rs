//! Active probe loop.
//!
//! Runs on an independent schedule (default 30s), issuing a minimal
//! completion or provider health endpoint call and feeding outcomes into
//! the breaker identically to user-driven outcomes. Probes never count
//! against budgets -- this loop never touches `BudgetEnforcer`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{Adapter, AdapterError};
use crate::circuit::CircuitBreaker;
use crate::credentials::CredentialResolver;
use crate::domain::ProbeResult;

pub struct ProbeLoop {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    regions: Vec<(String, String)>,
    breaker: Arc<CircuitBreaker>,
    credentials: Arc<dyn CredentialResolver>,
    interval: Duration,
}

impl ProbeLoop {
    pub fn new(
        adapters: HashMap<String, Arc<dyn Adapter>>,
        regions: Vec<(String, String)>,
        breaker: Arc<CircuitBreaker>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            adapters,
            regions,
            breaker,
            credentials,
            interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until the process exits. Intended to be spawned with
    /// `tokio::spawn` from the server binary's startup sequence.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        for (provider_id, region) in &self.regions {
            let Some(adapter) = self.adapters.get(provider_id) else {
                continue;
            };
            let credential = match self.credentials.resolve(provider_id).await {
                Ok(c) => c,
                Err(_) => continue,
            };

            let outcome = adapter.health_check(&credential).await;
            let timestamp = chrono::Utc::now();
            match outcome {
                Ok(health) => {
                    if health.ok {
                        self.breaker.record_success(provider_id, region).await;
                    } else {
                        self.breaker
                            .record_failure(provider_id, region, &AdapterError::Transient("health check failed".into()))
                            .await;
                    }
                    results.push(ProbeResult {
                        provider_id: provider_id.clone(),
                        region: region.clone(),
                        healthy: health.ok,
                        latency_ms: health.latency_ms,
                        timestamp,
                    });
                }
                Err(error) => {
                    self.breaker.record_failure(provider_id, region, &error).await;
                    results.push(ProbeResult {
                        provider_id: provider_id.clone(),
                        region: region.clone(),
                        healthy: false,
                        latency_ms: 0,
                        timestamp,
                    });
                }
            }
        }
        results
    }
}
