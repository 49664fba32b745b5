//! Module-level variables of a global context

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Generation-scoped storage for a script unit's module-level variables
///
/// Every load or reload of a unit creates fresh storage seeded from the
/// unit's initial values. Tasks still running from an older generation keep
/// their own storage and never see the new one.
#[derive(Debug, Clone)]
pub struct Globals {
    generation: u64,
    vars: Arc<RwLock<IndexMap<String, Value>>>,
}

impl Globals {
    pub fn new(generation: u64, initial: IndexMap<String, Value>) -> Self {
        Self {
            generation,
            vars: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.write().insert(name.into(), value.into());
    }

    /// Read-modify-write under one lock, returning the stored value
    pub fn update(&self, name: &str, f: impl FnOnce(Option<&Value>) -> Value) -> Value {
        let mut vars = self.vars.write();
        let value = f(vars.get(name));
        vars.insert(name.to_string(), value.clone());
        value
    }

    /// Add `delta` to an integer variable, treating a missing one as 0
    pub fn increment(&self, name: &str, delta: i64) -> i64 {
        self.update(name, |v| {
            Value::from(v.and_then(Value::as_i64).unwrap_or(0) + delta)
        })
        .as_i64()
        .unwrap_or_default()
    }

    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.vars.read().clone()
    }
}
