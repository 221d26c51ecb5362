//! Active-probe outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub provider_id: String,
    pub region: String,
    pub healthy: bool,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}
