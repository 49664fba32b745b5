//! Test host
//!
//! An in-memory host whose clock only moves when the test says so.

use autoscript_core::Context;
use autoscript_engine::{Autoscript, EngineConfig, MockClock, ScriptHost};
use autoscript_service_registry::ServiceResult;
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::time::Duration;

pub const DOMAIN: &str = "autoscript";

/// 2020-07-01 11:59:00, one minute before the noon schedules used in tests
pub fn start_time() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("2020-07-01 11:59:00", "%Y-%m-%d %H:%M:%S").unwrap()
}

pub struct TestHost {
    pub host: ScriptHost,
    pub clock: MockClock,
}

impl TestHost {
    pub fn new() -> Self {
        let clock = MockClock::at(start_time());
        Self {
            host: ScriptHost::new(clock.clone()),
            clock,
        }
    }

    /// An engine with a short tick so clock changes are noticed quickly
    pub fn engine(&self) -> Autoscript {
        let config = EngineConfig {
            tick_interval_ms: 5,
            ..Default::default()
        };
        Autoscript::new(self.host.clone(), config).unwrap()
    }

    pub fn set_state(&self, var_name: &str, value: impl Into<Value>) {
        self.host
            .states
            .set_value(var_name, &value.into(), Context::new())
            .unwrap();
    }

    pub fn state(&self, var_name: &str) -> Option<String> {
        self.host.states.get_state(var_name)
    }

    pub async fn call(&self, service: &str, data: Value) -> ServiceResult {
        self.host
            .services
            .call(DOMAIN, service, data, Context::new())
            .await
    }

    pub async fn reload(&self, global_ctx: Option<&str>) -> ServiceResult {
        let data = match global_ctx {
            Some(name) => json!({ "global_ctx": name }),
            None => json!({}),
        };
        self.call("reload", data).await
    }

    /// Poll until `var_name` holds `expected`
    pub async fn wait_for_state(&self, var_name: &str, expected: &str) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while self.state(var_name).as_deref() != Some(expected) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "{} never became {:?}; last value {:?}",
            var_name,
            expected,
            self.state(var_name)
        );
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// Let the dispatch loop and spawned tasks catch up
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
