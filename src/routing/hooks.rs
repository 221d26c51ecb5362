//! Routing hook registry.
//!
//! Hooks run in ascending priority order. A hook returning `Some(value)`
//! replaces the threaded value; `None` passes through unchanged. A hook
//! that exceeds its configured time budget is treated as a pass-through
//! and a warning event is the caller's responsibility to emit (the
//! registry itself only reports which hooks timed out).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait RoutingHook: Send + Sync {
    async fn on_request_received(&self, _value: Value) -> Option<Value> {
        None
    }
    async fn on_routing_decision(&self, _value: Value) -> Option<Value> {
        None
    }
    async fn on_provider_response(&self, _value: Value) -> Option<Value> {
        None
    }
    async fn on_request_completed(&self, _value: Value) -> Option<Value> {
        None
    }
}

struct RegisteredHook {
    priority: i32,
    hook: Box<dyn RoutingHook>,
}

pub struct HookRegistry {
    hooks: Vec<RegisteredHook>,
    budget: Duration,
}

pub enum HookPoint {
    RequestReceived,
    RoutingDecision,
    ProviderResponse,
    RequestCompleted,
}

impl HookRegistry {
    pub fn new(budget: Duration) -> Self {
        Self {
            hooks: Vec::new(),
            budget,
        }
    }

    pub fn register(&mut self, priority: i32, hook: Box<dyn RoutingHook>) {
        self.hooks.push(RegisteredHook { priority, hook });
        self.hooks.sort_by_key(|h| h.priority);
    }

    /// Runs every registered hook at `point` in priority order, threading
    /// `value` through each. Returns the final value and the names of
    /// hooks (by index) that exceeded the configured budget.
    pub async fn run(&self, point: HookPoint, mut value: Value) -> (Value, Vec<usize>) {
        let mut timed_out = Vec::new();

        for (index, registered) in self.hooks.iter().enumerate() {
            let call = async {
                match point {
                    HookPoint::RequestReceived => registered.hook.on_request_received(value.clone()).await,
                    HookPoint::RoutingDecision => registered.hook.on_routing_decision(value.clone()).await,
                    HookPoint::ProviderResponse => registered.hook.on_provider_response(value.clone()).await,
                    HookPoint::RequestCompleted => registered.hook.on_request_completed(value.clone()).await,
                }
            };

            match tokio::time::timeout(self.budget, call).await {
                Ok(Some(replacement)) => value = replacement,
                Ok(None) => {}
                Err(_) => timed_out.push(index),
            }
        }

        (value, timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ReplacingHook;

    #[async_trait]
    impl RoutingHook for ReplacingHook {
        async fn on_request_received(&self, _value: Value) -> Option<Value> {
            Some(json!({"replaced": true}))
        }
    }

    struct PassThroughHook;

    #[async_trait]
    impl RoutingHook for PassThroughHook {}

    struct SlowHook;

    #[async_trait]
    impl RoutingHook for SlowHook {
        async fn on_request_received(&self, _value: Value) -> Option<Value> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(json!({"too_late": true}))
        }
    }

    #[tokio::test]
    async fn hook_returning_some_replaces_value() {
        let mut registry = HookRegistry::new(Duration::from_millis(100));
        registry.register(1, Box::new(ReplacingHook));
        let (value, timed_out) = registry.run(HookPoint::RequestReceived, json!({})).await;
        assert_eq!(value, json!({"replaced": true}));
        assert!(timed_out.is_empty());
    }

    #[tokio::test]
    async fn hook_returning_none_passes_through() {
        let mut registry = HookRegistry::new(Duration::from_millis(100));
        registry.register(1, Box::new(PassThroughHook));
        let (value, _) = registry.run(HookPoint::RequestReceived, json!({"original": true})).await;
        assert_eq!(value, json!({"original": true}));
    }

    #[tokio::test]
    async fn hook_exceeding_budget_is_recorded_and_passed_through() {
        let mut registry = HookRegistry::new(Duration::from_millis(5));
        registry.register(1, Box::new(SlowHook));
        let (value, timed_out) = registry.run(HookPoint::RequestReceived, json!({"original": true})).await;
        assert_eq!(value, json!({"original": true}));
        assert_eq!(timed_out, vec![0]);
    }

    #[tokio::test]
    async fn hooks_run_in_priority_order() {
        let mut registry = HookRegistry::new(Duration::from_millis(100));
        registry.register(5, Box::new(ReplacingHook));
        registry.register(1, Box::new(PassThroughHook));
        assert_eq!(registry.hooks[0].priority, 1);
        assert_eq!(registry.hooks[1].priority, 5);
    }
}
