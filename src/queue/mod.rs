//! Request Queue.
//!
//! Used when in-flight requests exceed a configured concurrency cap, or
//! when the pipeline explicitly defers BATCH work. Modeled as a single
//! `BinaryHeap<QueuedRequestOrd>` rather than three separate queues: the
//! composite `Ord` on `QueuedRequestOrd` (priority first, then deadline)
//! gives the same "always drain priority 1 before 2 before 3; within a
//! priority, smallest deadline first" dispatch order as three logical
//! queues would, with one less data structure to keep in sync.

use std::collections::{BinaryHeap, HashMap};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::{Priority, QueuedRequest, QueuedRequestOrd};
use crate::error::GatewayError;

pub struct QueueThresholds {
    pub soft: usize,
    pub hard: usize,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self { soft: 500, hard: 1000 }
    }
}

struct Inner {
    heap: BinaryHeap<QueuedRequestOrd>,
    storage: HashMap<String, QueuedRequest>,
}

pub struct RequestQueue {
    inner: Mutex<Inner>,
    thresholds: QueueThresholds,
}

impl RequestQueue {
    pub fn new(thresholds: QueueThresholds) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                storage: HashMap::new(),
            }),
            thresholds,
        }
    }

    /// Ingress admission check. Priority 1 is
    /// admitted until a global admission freeze (out of scope here: that
    /// freeze is a memory-pressure signal from the process, not queue
    /// depth) -- so this only ever rejects priority 2/3.
    pub async fn admit(&self, priority: Priority) -> Result<(), GatewayError> {
        let depth = self.inner.lock().await.heap.len();
        match priority {
            Priority::Batch if depth >= self.thresholds.soft => Err(GatewayError::Overloaded),
            Priority::Interactive if depth >= self.thresholds.hard => Err(GatewayError::Overloaded),
            _ => Ok(()),
        }
    }

    pub async fn enqueue(&self, item: QueuedRequest) {
        let ord = QueuedRequestOrd {
            priority: item.priority,
            deadline: item.deadline,
            queue_id: item.queue_id.clone(),
        };
        let mut guard = self.inner.lock().await;
        guard.storage.insert(item.queue_id.clone(), item);
        guard.heap.push(ord);
    }

    /// Pops the most urgent non-expired entry. Expired entries are
    /// dropped silently from the caller's point of view; callers wanting
    /// to know about drops should use `dequeue_reporting`.
    pub async fn dequeue(&self) -> Option<QueuedRequest> {
        self.dequeue_reporting().await.ok().flatten()
    }

    /// Returns `Err(DeadlineExceeded)` for the first expired entry it
    /// would have dequeued, `Ok(Some(_))` for a live entry, `Ok(None)`
    /// when the queue is empty.
    pub async fn dequeue_reporting(&self) -> Result<Option<QueuedRequest>, GatewayError> {
        let mut guard = self.inner.lock().await;
        loop {
            let Some(ord) = guard.heap.pop() else {
                return Ok(None);
            };
            let Some(item) = guard.storage.remove(&ord.queue_id) else {
                continue;
            };
            if item.is_past_deadline(Utc::now()) {
                return Err(GatewayError::DeadlineExceeded);
            }
            return Ok(Some(item));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Capability, LatencyClass, LogicalPrompt, ResidencyConstraints, RoutingHints, TokenBudget};
    use chrono::Duration;
    use std::collections::{HashMap as StdHashMap, HashSet};

    fn item(id: &str, priority: Priority, deadline_secs: i64) -> QueuedRequest {
        let now = Utc::now();
        QueuedRequest {
            queue_id: id.to_string(),
            priority,
            enqueued_at: now,
            deadline: now + Duration::seconds(deadline_secs),
            attempt_count: 0,
            request: crate::domain::InferenceRequest {
                request_id: id.to_string(),
                principal_id: "p1".into(),
                organization_id: None,
                project_id: None,
                prompt: LogicalPrompt::default(),
                required_capabilities: HashSet::from([Capability::Text]),
                latency_class: LatencyClass::Interactive,
                token_budget: TokenBudget {
                    max_input: 100,
                    max_output: 100,
                    max_cost_cents: 10.0,
                },
                routing_hints: RoutingHints::default(),
                residency: ResidencyConstraints::default(),
                deadline: now + Duration::seconds(deadline_secs),
                metadata: StdHashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn higher_priority_drains_before_lower() {
        let queue = RequestQueue::new(QueueThresholds::default());
        queue.enqueue(item("batch-1", Priority::Batch, 60)).await;
        queue.enqueue(item("realtime-1", Priority::Realtime, 60)).await;
        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.queue_id, "realtime-1");
    }

    #[tokio::test]
    async fn within_priority_earliest_deadline_first() {
        let queue = RequestQueue::new(QueueThresholds::default());
        queue.enqueue(item("later", Priority::Interactive, 100)).await;
        queue.enqueue(item("sooner", Priority::Interactive, 10)).await;
        let first = queue.dequeue().await.unwrap();
        assert_eq!(first.queue_id, "sooner");
    }

    #[tokio::test]
    async fn expired_entry_reports_deadline_exceeded() {
        let queue = RequestQueue::new(QueueThresholds::default());
        queue.enqueue(item("expired", Priority::Realtime, -1)).await;
        let result = queue.dequeue_reporting().await;
        assert!(matches!(result, Err(GatewayError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn soft_threshold_rejects_batch_not_realtime() {
        let queue = RequestQueue::new(QueueThresholds { soft: 1, hard: 2 });
        queue.enqueue(item("b1", Priority::Batch, 60)).await;
        assert!(matches!(queue.admit(Priority::Batch).await, Err(GatewayError::Overloaded)));
        assert!(queue.admit(Priority::Realtime).await.is_ok());
    }
}
