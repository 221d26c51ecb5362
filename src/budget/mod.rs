//! Budget Enforcer.
//!
//! `check_and_reserve(org, project, principal, estimated_cost)` debits
//! `estimated_cost` from every level up front, rolling back any level
//! already debited if a later one is short. `settle` then reconciles the
//! reservation against the actual cost, debiting (or crediting back) only
//! the delta; `release` credits the full reservation back on pipeline
//! failure. Threshold events fire at 80/90/100% exactly once per window.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::{Budget, BudgetLevel};
use crate::error::GatewayError;
use crate::events::{Event, EventEmitter, EventType};

pub struct ReservationHandle {
    pub org_key: String,
    pub project_key: String,
    pub agent_key: String,
    pub reserved_cents: f64,
}

pub struct BudgetEnforcer {
    budgets: DashMap<(BudgetLevel, String), Mutex<Budget>>,
    emitter: std::sync::Arc<dyn EventEmitter>,
}

impl BudgetEnforcer {
    pub fn new(emitter: std::sync::Arc<dyn EventEmitter>) -> Self {
        Self {
            budgets: DashMap::new(),
            emitter,
        }
    }

    pub fn set_limit(&self, level: BudgetLevel, key: impl Into<String>, limit_cents: f64) {
        let key = key.into();
        self.budgets
            .insert((level, key.clone()), Mutex::new(Budget::new(level, key, limit_cents, Utc::now())));
    }

    /// Checks-then-debits a single level atomically under its own lock.
    /// A level with no configured budget always succeeds without
    /// mutating anything.
    async fn try_debit(&self, level: BudgetLevel, key: &str, cents: f64) -> bool {
        match self.budgets.get(&(level, key.to_string())) {
            Some(budget) => {
                let mut guard = budget.lock().await;
                if guard.has_at_least(cents) {
                    guard.debit(cents);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    async fn credit(&self, level: BudgetLevel, key: &str, cents: f64) {
        if let Some(budget) = self.budgets.get(&(level, key.to_string())) {
            budget.lock().await.debit(-cents);
        }
    }

    /// Debits `estimated_cents` from every level up front. If a later
    /// level turns out to be short, every level already debited for this
    /// reservation is rolled back before the error is returned, so a
    /// rejected reservation never leaves a partial debit behind.
    pub async fn check_and_reserve(
        &self,
        org_key: &str,
        project_key: &str,
        agent_key: &str,
        estimated_cents: f64,
    ) -> Result<ReservationHandle, GatewayError> {
        let levels = [
            (BudgetLevel::Org, org_key),
            (BudgetLevel::Project, project_key),
            (BudgetLevel::Agent, agent_key),
        ];

        let mut debited = Vec::with_capacity(levels.len());
        for (level, key) in levels {
            if self.try_debit(level, key, estimated_cents).await {
                debited.push((level, key));
            } else {
                for (rolled_level, rolled_key) in debited {
                    self.credit(rolled_level, rolled_key, estimated_cents).await;
                }
                return Err(GatewayError::BudgetExhausted { level });
            }
        }

        Ok(ReservationHandle {
            org_key: org_key.to_string(),
            project_key: project_key.to_string(),
            agent_key: agent_key.to_string(),
            reserved_cents: estimated_cents,
        })
    }

    /// Reconciles the reservation against the actual cost: only the
    /// delta between `actual_cents` and what was already reserved is
    /// debited (a negative delta credits the difference back). Emits
    /// threshold events exactly once per window per level.
    pub async fn settle(&self, reservation: &ReservationHandle, actual_cents: f64) {
        let delta = actual_cents - reservation.reserved_cents;
        for (level, key) in [
            (BudgetLevel::Org, reservation.org_key.as_str()),
            (BudgetLevel::Project, reservation.project_key.as_str()),
            (BudgetLevel::Agent, reservation.agent_key.as_str()),
        ] {
            let Some(budget) = self.budgets.get(&(level, key.to_string())) else {
                continue;
            };
            let mut guard = budget.lock().await;
            guard.debit(delta);
            let newly = guard.newly_crossed_thresholds();
            let level_tag = level;
            let key_owned = key.to_string();
            drop(guard);
            for threshold in newly {
                self.emitter
                    .emit(Event::new(
                        EventType::ModelBudgetExhausted,
                        key_owned.clone(),
                        serde_json::json!({
                            "level": level_tag.to_string(),
                            "key": key_owned,
                            "threshold_pct": threshold,
                        }),
                        Utc::now(),
                    ))
                    .await;
            }
        }
    }

    /// Reservation release on pipeline failure: credits the full
    /// reserved amount back to every level.
    pub async fn release(&self, reservation: ReservationHandle) {
        for (level, key) in [
            (BudgetLevel::Org, reservation.org_key.as_str()),
            (BudgetLevel::Project, reservation.project_key.as_str()),
            (BudgetLevel::Agent, reservation.agent_key.as_str()),
        ] {
            self.credit(level, key, reservation.reserved_cents).await;
        }
    }

    /// Administrative override: extend the remaining balance at a level,
    /// time-boxed by convention of the caller re-applying `set_limit` once
    /// the window expires. Returns the new remaining balance.
    pub async fn override_budget(
        &self,
        level: BudgetLevel,
        key: &str,
        amount_cents: f64,
    ) -> Option<f64> {
        let budget = self.budgets.get(&(level, key.to_string()))?;
        let mut guard = budget.lock().await;
        guard.remaining_cents += amount_cents;
        Some(guard.remaining_cents)
    }

    pub async fn snapshot(&self) -> HashMap<(BudgetLevel, String), f64> {
        let mut map = HashMap::new();
        for entry in self.budgets.iter() {
            let budget = entry.value().lock().await;
            map.insert(entry.key().clone(), budget.remaining_cents);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingEventEmitter;
    use std::sync::Arc;

    fn enforcer() -> BudgetEnforcer {
        BudgetEnforcer::new(Arc::new(TracingEventEmitter))
    }

    #[tokio::test]
    async fn reserve_fails_when_any_level_is_short() {
        let enforcer = enforcer();
        enforcer.set_limit(BudgetLevel::Org, "org1", 1000.0);
        enforcer.set_limit(BudgetLevel::Project, "proj1", 10.0);
        enforcer.set_limit(BudgetLevel::Agent, "agent1", 1000.0);

        let result = enforcer.check_and_reserve("org1", "proj1", "agent1", 500.0).await;
        assert!(matches!(
            result,
            Err(GatewayError::BudgetExhausted { level: BudgetLevel::Project })
        ));
    }

    #[tokio::test]
    async fn reserve_debits_remaining_so_concurrent_reservations_cannot_both_pass() {
        let enforcer = enforcer();
        enforcer.set_limit(BudgetLevel::Org, "org1", 100.0);
        enforcer.set_limit(BudgetLevel::Project, "proj1", 100.0);
        enforcer.set_limit(BudgetLevel::Agent, "agent1", 100.0);

        let first = enforcer.check_and_reserve("org1", "proj1", "agent1", 60.0).await;
        assert!(first.is_ok());
        let second = enforcer.check_and_reserve("org1", "proj1", "agent1", 60.0).await;
        assert!(matches!(second, Err(GatewayError::BudgetExhausted { .. })));
    }

    #[tokio::test]
    async fn settle_debits_only_the_delta_past_the_reservation() {
        let enforcer = enforcer();
        enforcer.set_limit(BudgetLevel::Org, "org1", 100.0);
        enforcer.set_limit(BudgetLevel::Project, "proj1", 100.0);
        enforcer.set_limit(BudgetLevel::Agent, "agent1", 100.0);

        let reservation = enforcer.check_and_reserve("org1", "proj1", "agent1", 10.0).await.unwrap();
        let snapshot = enforcer.snapshot().await;
        assert_eq!(snapshot[&(BudgetLevel::Org, "org1".to_string())], 90.0);

        enforcer.settle(&reservation, 150.0).await;

        let snapshot = enforcer.snapshot().await;
        let remaining = snapshot[&(BudgetLevel::Org, "org1".to_string())];
        // Reservation already took 10; settle should debit only the
        // remaining 140, not the full 150 again.
        assert_eq!(remaining, -50.0);
    }

    #[tokio::test]
    async fn release_credits_back_the_full_reservation() {
        let enforcer = enforcer();
        enforcer.set_limit(BudgetLevel::Org, "org1", 100.0);
        enforcer.set_limit(BudgetLevel::Project, "proj1", 100.0);
        enforcer.set_limit(BudgetLevel::Agent, "agent1", 100.0);

        let reservation = enforcer.check_and_reserve("org1", "proj1", "agent1", 30.0).await.unwrap();
        enforcer.release(reservation).await;

        let snapshot = enforcer.snapshot().await;
        assert_eq!(snapshot[&(BudgetLevel::Org, "org1".to_string())], 100.0);
    }

    #[tokio::test]
    async fn override_budget_extends_remaining_balance() {
        let enforcer = enforcer();
        enforcer.set_limit(BudgetLevel::Org, "org1", 100.0);
        let new_balance = enforcer.override_budget(BudgetLevel::Org, "org1", 50.0).await;
        assert_eq!(new_balance, Some(150.0));
    }

    #[tokio::test]
    async fn missing_level_is_treated_as_unlimited() {
        let enforcer = enforcer();
        let result = enforcer.check_and_reserve("unset-org", "unset-proj", "unset-agent", 9999.0).await;
        assert!(result.is_ok());
    }
}
