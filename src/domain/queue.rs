//! Deadline-priority queue entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::InferenceRequest;

/// 1 = REALTIME, highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Realtime = 1,
    Interactive = 2,
    Batch = 3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub queue_id: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub attempt_count: u32,
    pub request: InferenceRequest,
}

impl QueuedRequest {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

// Ordering for the binary-heap-backed priority queue: lower priority value
// (i.e. more urgent) first, then earlier deadline first. `BinaryHeap` is a
// max-heap, so `Ord` is implemented to make the most urgent entry compare
// as greatest.
impl PartialEq for QueuedRequestOrd {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.deadline == other.deadline
    }
}
impl Eq for QueuedRequestOrd {}

impl PartialOrd for QueuedRequestOrd {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequestOrd {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse priority (1 should sort "greatest"/drained first).
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.deadline.cmp(&self.deadline))
    }
}

/// Thin wrapper carrying just the fields the heap needs to order by,
/// paired with an index into the owning queue's storage.
#[derive(Debug, Clone)]
pub struct QueuedRequestOrd {
    pub priority: Priority,
    pub deadline: DateTime<Utc>,
    pub queue_id: String,
}
