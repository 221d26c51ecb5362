//! Hierarchical budget state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Org,
    Project,
    Agent,
}

impl std::fmt::Display for BudgetLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetLevel::Org => write!(f, "org"),
            BudgetLevel::Project => write!(f, "project"),
            BudgetLevel::Agent => write!(f, "agent"),
        }
    }
}

/// Tracked at each of org/project/agent. `remaining_cents` is monotone
/// non-increasing within a window except by rollover or administrative
/// override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub level: BudgetLevel,
    pub key: String,
    pub remaining_cents: f64,
    pub limit_cents: f64,
    pub window_start: DateTime<Utc>,
    /// Thresholds (80/90/100%) already fired this window, so each event
    /// is emitted exactly once per window.
    pub thresholds_fired: Vec<u8>,
}

impl Budget {
    pub fn new(level: BudgetLevel, key: impl Into<String>, limit_cents: f64, now: DateTime<Utc>) -> Self {
        Self {
            level,
            key: key.into(),
            remaining_cents: limit_cents,
            limit_cents,
            window_start: now,
            thresholds_fired: Vec::new(),
        }
    }

    pub fn percentage_used(&self) -> f64 {
        if self.limit_cents <= 0.0 {
            100.0
        } else {
            ((self.limit_cents - self.remaining_cents) / self.limit_cents * 100.0).max(0.0)
        }
    }

    pub fn has_at_least(&self, cents: f64) -> bool {
        self.remaining_cents >= cents
    }

    /// Debit the actual cost unconditionally: the reservation is a
    /// pre-check, not a hard cap, so this can drive `remaining_cents`
    /// negative.
    pub fn debit(&mut self, cents: f64) {
        self.remaining_cents -= cents;
    }

    pub fn rollover(&mut self, now: DateTime<Utc>) {
        self.remaining_cents = self.limit_cents;
        self.window_start = now;
        self.thresholds_fired.clear();
    }

    /// Thresholds newly crossed by this debit, for the "exactly once per
    /// window" emission policy.
    pub fn newly_crossed_thresholds(&mut self) -> Vec<u8> {
        let used_pct = self.percentage_used();
        let mut newly = Vec::new();
        for &threshold in &[80u8, 90, 100] {
            if used_pct >= threshold as f64 && !self.thresholds_fired.contains(&threshold) {
                self.thresholds_fired.push(threshold);
                newly.push(threshold);
            }
        }
        newly
    }
}
