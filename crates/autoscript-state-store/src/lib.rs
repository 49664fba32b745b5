//! Live state variable store
//!
//! The store is the engine's view of the outside world: scripts read and
//! write variables such as `autoscript.done`, and every write is announced on
//! the event bus as a `state_changed` event carrying the old and new state.
//! State triggers are driven entirely by those events.

use autoscript_core::events::StateChangedData;
use autoscript_core::{Context, State, VarName, VarNameError};
use autoscript_event_bus::EventBus;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Concurrent map of variable name to current state
pub struct StateStore {
    states: DashMap<String, State>,
    event_bus: Arc<EventBus>,
}

impl StateStore {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            event_bus,
        }
    }

    /// Write a variable and fire `state_changed`
    ///
    /// The event is fired while the variable's map entry is still held, so
    /// two racing writers to the same variable publish their events in the
    /// same order their writes were applied.
    #[instrument(skip(self, value, attributes, context), fields(var_name = %var_name))]
    pub fn set(
        &self,
        var_name: VarName,
        value: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let value = value.into();

        match self.states.entry(var_name.to_string()) {
            Entry::Occupied(mut slot) => {
                let old_state = slot.get().clone();
                let new_state = old_state.with_update(value, attributes, context.clone());
                debug!(
                    value = %new_state.value,
                    changed = old_state.value != new_state.value,
                    "Updating state variable"
                );
                slot.insert(new_state.clone());
                self.announce(var_name, Some(old_state), Some(new_state.clone()), context);
                new_state
            }
            Entry::Vacant(slot) => {
                let new_state = State::new(var_name.clone(), value, attributes, context.clone());
                debug!(value = %new_state.value, "Creating state variable");
                slot.insert(new_state.clone());
                self.announce(var_name, None, Some(new_state.clone()), context);
                new_state
            }
        }
    }

    /// Write a JSON value under a `domain.name` string, keeping attributes
    ///
    /// This is the entry point scripts use; non-string values are stored in
    /// their rendered form.
    pub fn set_value(
        &self,
        var_name: &str,
        value: &serde_json::Value,
        context: Context,
    ) -> Result<State, VarNameError> {
        let var: VarName = var_name.parse()?;
        let attributes = self
            .states
            .get(var_name)
            .map(|s| s.attributes.clone())
            .unwrap_or_default();
        Ok(self.set(var, State::render_value(value), attributes, context))
    }

    pub fn get(&self, var_name: &str) -> Option<State> {
        self.states.get(var_name).map(|s| s.clone())
    }

    /// Current value, `None` if the variable is unset
    pub fn get_state(&self, var_name: &str) -> Option<String> {
        self.states.get(var_name).map(|s| s.value.clone())
    }

    pub fn contains(&self, var_name: &str) -> bool {
        self.states.contains_key(var_name)
    }

    /// Names of all variables in one domain, sorted
    pub fn names_in_domain(&self, domain: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .states
            .iter()
            .filter(|s| s.var_name.domain() == domain)
            .map(|s| s.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Remove a variable; fires `state_changed` with no new state
    #[instrument(skip(self, context), fields(var_name = %var_name))]
    pub fn remove(&self, var_name: &VarName, context: Context) -> Option<State> {
        let (_, old_state) = self.states.remove(&var_name.to_string())?;
        debug!("Removed state variable");
        self.announce(var_name.clone(), Some(old_state.clone()), None, context);
        Some(old_state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn announce(
        &self,
        var_name: VarName,
        old_state: Option<State>,
        new_state: Option<State>,
        context: Context,
    ) {
        self.event_bus.fire_typed(
            StateChangedData {
                var_name,
                old_state,
                new_state,
            },
            context,
        );
    }
}

pub type SharedStateStore = Arc<StateStore>;
