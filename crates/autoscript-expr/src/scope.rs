//! Expression scope backed by the state store

use autoscript_state_store::StateStore;
use minijinja::value::{Object, ObjectRepr, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Pinned variable values; `None` pins a variable as unset
type Overrides = Arc<HashMap<String, Option<String>>>;

/// Root scope of an expression
///
/// Bare names are looked up in `locals` first (event payload fields), then
/// treated as a state variable domain so that `domain.name` reads the
/// variable's current value. A pinned variable reads its pinned value
/// instead of the store.
pub struct StateScope {
    states: Arc<StateStore>,
    locals: serde_json::Map<String, serde_json::Value>,
    overrides: Overrides,
}

impl StateScope {
    pub fn new(states: Arc<StateStore>) -> Self {
        Self::with_locals(states, serde_json::Map::new())
    }

    pub fn with_locals(
        states: Arc<StateStore>,
        locals: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            states,
            locals,
            overrides: Arc::default(),
        }
    }

    /// Scope where `var_name` reads `value` regardless of the store
    pub fn with_override(states: Arc<StateStore>, var_name: &str, value: Option<&str>) -> Self {
        let mut overrides = HashMap::new();
        overrides.insert(var_name.to_string(), value.map(str::to_string));
        Self {
            states,
            locals: serde_json::Map::new(),
            overrides: Arc::new(overrides),
        }
    }

    pub(crate) fn has_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub(crate) fn is_set(&self, var_name: &str) -> bool {
        match self.overrides.get(var_name) {
            Some(pinned) => pinned.is_some(),
            None => self.states.contains(var_name),
        }
    }
}

impl std::fmt::Debug for StateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateScope")
            .field("locals", &self.locals.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Object for StateScope {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        if let Some(local) = self.locals.get(key) {
            return Some(Value::from_serialize(local));
        }
        Some(Value::from_object(DomainProxy {
            domain: key.to_string(),
            states: self.states.clone(),
            overrides: self.overrides.clone(),
        }))
    }
}

/// `domain` in `domain.name`
struct DomainProxy {
    domain: String,
    states: Arc<StateStore>,
    overrides: Overrides,
}

impl std::fmt::Debug for DomainProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainProxy")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Object for DomainProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let var_name = format!("{}.{}", self.domain, key.as_str()?);
        match self.overrides.get(&var_name) {
            Some(pinned) => pinned.clone().map(Value::from),
            None => self.states.get_state(&var_name).map(Value::from),
        }
    }
}
