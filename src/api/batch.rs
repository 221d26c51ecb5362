//! In-memory batch-job bookkeeping for `POST /v1/batch` / `GET
//! /v1/batch/:handle`.
//!
//! Batch submission spawns a task that dispatches each request
//! independently and records results as they land, rather than blocking
//! the HTTP response on the whole batch.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api::types::{BatchItemResult, BatchStatus, BatchStatusResponse, ErrorDetail};

struct BatchRecord {
    total: usize,
    results: Vec<BatchItemResult>,
}

/// Process-local batch store. Batches do not survive a restart; unlike
/// the cache, rate limiter, circuit breaker and budget state, batch
/// bookkeeping is not part of the gateway's durable state.
#[derive(Default)]
pub struct BatchStore {
    records: dashmap::DashMap<String, Arc<RwLock<BatchRecord>>>,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, batch_id: String, total: usize) {
        self.records.insert(
            batch_id,
            Arc::new(RwLock::new(BatchRecord {
                total,
                results: Vec::with_capacity(total),
            })),
        );
    }

    pub async fn push_result(&self, batch_id: &str, result: BatchItemResult) {
        if let Some(record) = self.records.get(batch_id) {
            record.write().await.results.push(result);
        }
    }

    pub async fn status(&self, batch_id: &str) -> Option<BatchStatusResponse> {
        let record = self.records.get(batch_id)?;
        let guard = record.read().await;
        let status = if guard.results.len() >= guard.total {
            BatchStatus::Completed
        } else {
            BatchStatus::InProgress
        };
        Some(BatchStatusResponse {
            batch_id: batch_id.to_string(),
            status,
            completed: guard.results.len(),
            total: guard.total,
            results: guard.results.clone(),
        })
    }
}

pub fn error_item(request_id: String, error: &crate::error::GatewayError) -> BatchItemResult {
    BatchItemResult {
        request_id,
        ok: false,
        response: None,
        error: Some(ErrorDetail {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }),
    }
}

pub fn ok_item(response: crate::domain::InferenceResponse) -> BatchItemResult {
    BatchItemResult {
        request_id: response.request_id.clone(),
        ok: true,
        response: Some(response),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_is_in_progress_until_every_item_lands() {
        let store = BatchStore::new();
        store.create("batch-1".to_string(), 2);

        let status = store.status("batch-1").await.unwrap();
        assert_eq!(status.status, BatchStatus::InProgress);
        assert_eq!(status.completed, 0);

        store
            .push_result(
                "batch-1",
                BatchItemResult {
                    request_id: "r1".to_string(),
                    ok: true,
                    response: None,
                    error: None,
                },
            )
            .await;

        let status = store.status("batch-1").await.unwrap();
        assert_eq!(status.status, BatchStatus::InProgress);
        assert_eq!(status.completed, 1);

        store
            .push_result(
                "batch-1",
                BatchItemResult {
                    request_id: "r2".to_string(),
                    ok: false,
                    response: None,
                    error: Some(ErrorDetail {
                        kind: "timeout".to_string(),
                        message: "deadline exceeded".to_string(),
                    }),
                },
            )
            .await;

        let status = store.status("batch-1").await.unwrap();
        assert_eq!(status.status, BatchStatus::Completed);
        assert_eq!(status.completed, 2);
    }

    #[tokio::test]
    async fn unknown_batch_returns_none() {
        let store = BatchStore::new();
        assert!(store.status("nonexistent").await.is_none());
    }
}
