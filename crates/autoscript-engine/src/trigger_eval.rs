//! Per-binding trigger state machines
//!
//! A binding is one armed trigger of one function. State bindings are edge
//! triggered: they fire when their condition goes from not-true to true.
//! Event bindings fire on every match. Time bindings fire when the clock
//! reaches their next fire time and then reschedule.

use autoscript_core::events::StateChangedData;
use autoscript_expr::{watched_vars, ExprEngine};
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{trace, warn};

use crate::error::TriggerError;
use crate::function::Bindings;
use crate::schedule::Schedule;
use crate::spec::{EventTriggerSpec, SharedFunctionSpec, StateTriggerSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Nothing evaluated yet
    Unarmed,
    /// Last evaluation was false or failed
    Armed,
    /// Last evaluation was true
    Fired,
}

pub(crate) struct StateBinding {
    pub spec: SharedFunctionSpec,
    trigger: StateTriggerSpec,
    watched: HashSet<String>,
    /// Variables named by bare-variable expressions
    bare: HashSet<String>,
    conditions: Vec<String>,
    phase: Phase,
}

impl StateBinding {
    pub fn new(
        spec: SharedFunctionSpec,
        trigger: StateTriggerSpec,
        expr: &ExprEngine,
    ) -> Result<Self, TriggerError> {
        let mut watched = HashSet::new();
        let mut bare = HashSet::new();
        let mut conditions = Vec::new();

        for source in &trigger.exprs {
            expr.check(source)?;
            match ExprEngine::bare_var(source) {
                Some(var) => {
                    watched.insert(var.clone());
                    bare.insert(var);
                }
                None => {
                    watched.extend(watched_vars(source));
                    conditions.push(source.clone());
                }
            }
        }

        Ok(Self {
            spec,
            trigger,
            watched,
            bare,
            conditions,
            phase: Phase::Unarmed,
        })
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The changed variable reads the value carried by `change`, not the store
    fn condition_holds(&self, change: &StateChangedData, expr: &ExprEngine) -> bool {
        let var = change.var_name.to_string();
        self.conditions.iter().any(|source| match expr.eval_bool_with_override(
            source,
            &var,
            change.new_value(),
        ) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    "{}: state_trigger '{}' evaluation failed: {}",
                    self.spec.qualified(),
                    source,
                    err
                );
                false
            }
        })
    }

    /// Feed one state change; returns the bindings when the trigger fires
    pub fn on_change(&mut self, change: &StateChangedData, expr: &ExprEngine) -> Option<Bindings> {
        let var = change.var_name.to_string();
        if !self.watched.contains(&var) {
            return None;
        }

        let changed = self.bare.contains(&var) && change.old_value() != change.new_value();

        let mut rising = false;
        if !self.conditions.is_empty() {
            let holds = self.condition_holds(change, expr);
            rising = holds && self.phase != Phase::Fired;
            self.phase = if holds { Phase::Fired } else { Phase::Armed };
        }

        if !(rising || changed) {
            return None;
        }
        if let Some(from) = &self.trigger.from {
            if change.old_value() != Some(from.as_str()) {
                trace!(var = %var, "from filter did not match");
                return None;
            }
        }
        if let Some(to) = &self.trigger.to {
            if change.new_value() != Some(to.as_str()) {
                trace!(var = %var, "to filter did not match");
                return None;
            }
        }

        let mut bindings = Bindings::new();
        bindings.insert("trigger_type".to_string(), json!("state"));
        bindings.insert("var_name".to_string(), json!(var));
        bindings.insert("value".to_string(), json!(change.new_value()));
        bindings.insert("old_value".to_string(), json!(change.old_value()));
        Some(bindings)
    }
}

pub(crate) struct EventBinding {
    pub spec: SharedFunctionSpec,
    trigger: EventTriggerSpec,
}

impl EventBinding {
    pub fn new(
        spec: SharedFunctionSpec,
        trigger: EventTriggerSpec,
        expr: &ExprEngine,
    ) -> Result<Self, TriggerError> {
        if let Some(predicate) = &trigger.predicate {
            expr.check(predicate)?;
        }
        Ok(Self { spec, trigger })
    }

    pub fn on_event(&self, event_type: &str, data: &Value, expr: &ExprEngine) -> Option<Bindings> {
        if self.trigger.event_type != event_type {
            return None;
        }
        let payload = data.as_object().cloned().unwrap_or_default();

        if let Some(predicate) = &self.trigger.predicate {
            match expr.eval_bool_with(predicate, payload.clone()) {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    warn!(
                        "{}: event_trigger '{}' evaluation failed: {}",
                        self.spec.qualified(),
                        predicate,
                        err
                    );
                    return None;
                }
            }
        }

        let mut bindings = Bindings::new();
        bindings.insert("trigger_type".to_string(), json!("event"));
        bindings.insert("event_type".to_string(), json!(event_type));
        for (key, value) in payload {
            bindings.insert(key, value);
        }
        Some(bindings)
    }
}

pub(crate) struct TimeBinding {
    pub spec: SharedFunctionSpec,
    pub schedule: Schedule,
    armed_at: NaiveDateTime,
    next: Option<NaiveDateTime>,
    /// Startup/shutdown not yet fired this generation
    pending: bool,
}

impl TimeBinding {
    pub fn new(spec: SharedFunctionSpec, source: &str, now: NaiveDateTime) -> Result<Self, TriggerError> {
        let schedule: Schedule = source.parse()?;
        let next = schedule.next_after(now, now);
        Ok(Self {
            spec,
            pending: schedule.is_symbolic(),
            schedule,
            armed_at: now,
            next,
        })
    }

    pub fn next_fire(&self) -> Option<NaiveDateTime> {
        self.next
    }

    /// Fire a pending startup or shutdown binding
    pub fn take_symbolic(&mut self, which: &Schedule) -> Option<Bindings> {
        if !self.pending || &self.schedule != which {
            return None;
        }
        self.pending = false;
        let label = match which {
            Schedule::Shutdown => "shutdown",
            _ => "startup",
        };
        Some(time_bindings(json!(label)))
    }

    /// Fire if due, then reschedule strictly after `now`
    pub fn take_due(&mut self, now: NaiveDateTime) -> Option<Bindings> {
        let due = self.next.filter(|next| *next <= now)?;
        self.next = self.schedule.next_after(now, self.armed_at);
        Some(time_bindings(json!(due.format("%Y-%m-%dT%H:%M:%S").to_string())))
    }
}

fn time_bindings(trigger_time: Value) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert("trigger_type".to_string(), json!("time"));
    bindings.insert("trigger_time".to_string(), trigger_time);
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::CompiledFunction;
    use crate::globals::Globals;
    use crate::spec::FunctionSpec;
    use autoscript_core::{Context, State, VarName};
    use autoscript_event_bus::EventBus;
    use autoscript_state_store::StateStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn spec() -> SharedFunctionSpec {
        Arc::new(FunctionSpec {
            context: "file.test".to_string(),
            generation: 1,
            function: CompiledFunction::new("func1", |_inv| async { Ok(()) }),
            service: None,
            triggers: Vec::new(),
            active: None,
            unique: None,
            globals: Globals::new(1, Default::default()),
        })
    }

    fn setup() -> (Arc<StateStore>, ExprEngine) {
        let store = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let expr = ExprEngine::new(store.clone());
        (store, expr)
    }

    /// Write through the store and return the matching change record
    fn write(store: &StateStore, name: &str, value: &str) -> StateChangedData {
        let var: VarName = name.parse().unwrap();
        let old_state = store.get(name);
        let new_state: State = store.set(var.clone(), value, HashMap::new(), Context::new());
        StateChangedData {
            var_name: var,
            old_state,
            new_state: Some(new_state),
        }
    }

    fn state_trigger(exprs: &[&str]) -> StateTriggerSpec {
        StateTriggerSpec {
            exprs: exprs.iter().map(|s| s.to_string()).collect(),
            from: None,
            to: None,
        }
    }

    #[test]
    fn test_fires_only_on_rising_edge() {
        let (store, expr) = setup();
        let mut binding =
            StateBinding::new(spec(), state_trigger(&["autoscript.f1var1 == '1'"]), &expr).unwrap();
        assert_eq!(binding.phase(), Phase::Unarmed);

        assert!(binding.on_change(&write(&store, "autoscript.f1var1", "0"), &expr).is_none());
        assert_eq!(binding.phase(), Phase::Armed);
        assert!(binding
            .on_change(&write(&store, "autoscript.f1var1", "string"), &expr)
            .is_none());

        let fired = binding
            .on_change(&write(&store, "autoscript.f1var1", "1"), &expr)
            .unwrap();
        assert_eq!(fired["var_name"], json!("autoscript.f1var1"));
        assert_eq!(fired["value"], json!("1"));
        assert_eq!(fired["old_value"], json!("string"));

        // still true: no refire
        assert!(binding.on_change(&write(&store, "autoscript.f1var1", "1"), &expr).is_none());
        assert_eq!(binding.phase(), Phase::Fired);

        assert!(binding.on_change(&write(&store, "autoscript.f1var1", "2"), &expr).is_none());
        assert!(binding.on_change(&write(&store, "autoscript.f1var1", "1"), &expr).is_some());
    }

    #[test]
    fn test_changes_are_judged_by_their_own_value() {
        let (store, expr) = setup();
        let mut binding =
            StateBinding::new(spec(), state_trigger(&["autoscript.f1var1 == '1'"]), &expr).unwrap();

        // all three writes land before any notification is processed
        let changes = [
            write(&store, "autoscript.f1var1", "0"),
            write(&store, "autoscript.f1var1", "string"),
            write(&store, "autoscript.f1var1", "1"),
        ];

        assert!(binding.on_change(&changes[0], &expr).is_none());
        assert!(binding.on_change(&changes[1], &expr).is_none());
        let fired = binding.on_change(&changes[2], &expr).unwrap();
        assert_eq!(fired["value"], json!("1"));
        assert_eq!(fired["old_value"], json!("string"));
    }

    #[test]
    fn test_first_true_evaluation_fires() {
        let (store, expr) = setup();
        let mut binding =
            StateBinding::new(spec(), state_trigger(&["autoscript.x == 'on'"]), &expr).unwrap();
        assert!(binding.on_change(&write(&store, "autoscript.x", "on"), &expr).is_some());
    }

    #[test]
    fn test_unrelated_variable_is_ignored() {
        let (store, expr) = setup();
        let mut binding =
            StateBinding::new(spec(), state_trigger(&["autoscript.x == 'on'"]), &expr).unwrap();
        write(&store, "autoscript.x", "on");
        assert!(binding.on_change(&write(&store, "autoscript.y", "on"), &expr).is_none());
        assert_eq!(binding.phase(), Phase::Unarmed);
    }

    #[test]
    fn test_evaluation_error_counts_as_false() {
        let (store, expr) = setup();
        let mut binding = StateBinding::new(
            spec(),
            state_trigger(&["autoscript.a == '1' and autoscript.b == '1'"]),
            &expr,
        )
        .unwrap();

        // autoscript.b unset: evaluation fails
        assert!(binding.on_change(&write(&store, "autoscript.a", "1"), &expr).is_none());
        assert_eq!(binding.phase(), Phase::Armed);
        assert!(binding.on_change(&write(&store, "autoscript.b", "1"), &expr).is_some());
    }

    #[test]
    fn test_bare_variable_fires_on_every_change() {
        let (store, expr) = setup();
        let mut binding = StateBinding::new(spec(), state_trigger(&["autoscript.door"]), &expr).unwrap();

        assert!(binding.on_change(&write(&store, "autoscript.door", "open"), &expr).is_some());
        assert!(binding.on_change(&write(&store, "autoscript.door", "open"), &expr).is_none());
        assert!(binding.on_change(&write(&store, "autoscript.door", "closed"), &expr).is_some());
    }

    #[test]
    fn test_from_to_filters() {
        let (store, expr) = setup();
        let mut trigger = state_trigger(&["autoscript.door"]);
        trigger.from = Some("closed".to_string());
        trigger.to = Some("open".to_string());
        let mut binding = StateBinding::new(spec(), trigger, &expr).unwrap();

        assert!(binding.on_change(&write(&store, "autoscript.door", "open"), &expr).is_none());
        assert!(binding.on_change(&write(&store, "autoscript.door", "closed"), &expr).is_none());
        assert!(binding.on_change(&write(&store, "autoscript.door", "open"), &expr).is_some());
    }

    #[test]
    fn test_invalid_expression_is_rejected() {
        let (_, expr) = setup();
        assert!(matches!(
            StateBinding::new(spec(), state_trigger(&["autoscript.a == "]), &expr),
            Err(TriggerError::Expr(_))
        ));
    }

    #[test]
    fn test_event_binding() {
        let (store, expr) = setup();
        store.set("autoscript.armed".parse().unwrap(), "yes", HashMap::new(), Context::new());
        let binding = EventBinding::new(
            spec(),
            EventTriggerSpec {
                event_type: "door_bell".to_string(),
                predicate: Some("button == 2 and autoscript.armed == 'yes'".to_string()),
            },
            &expr,
        )
        .unwrap();

        assert!(binding.on_event("other", &json!({"button": 2}), &expr).is_none());
        assert!(binding.on_event("door_bell", &json!({"button": 1}), &expr).is_none());
        assert!(binding.on_event("door_bell", &json!({}), &expr).is_none());

        let fired = binding.on_event("door_bell", &json!({"button": 2}), &expr).unwrap();
        assert_eq!(fired["trigger_type"], json!("event"));
        assert_eq!(fired["event_type"], json!("door_bell"));
        assert_eq!(fired["button"], json!(2));
    }

    #[test]
    fn test_time_binding_reschedules() {
        let now = NaiveDateTime::parse_from_str("2020-07-01 11:59:59", "%Y-%m-%d %H:%M:%S").unwrap();
        let mut binding = TimeBinding::new(spec(), "cron(*/30 * * * *)", now).unwrap();
        assert!(binding.take_due(now).is_none());

        let at_noon = now + chrono::Duration::seconds(1);
        let fired = binding.take_due(at_noon).unwrap();
        assert_eq!(fired["trigger_time"], json!("2020-07-01T12:00:00"));
        assert!(binding.take_due(at_noon).is_none());
        assert_eq!(
            binding.next_fire().unwrap().to_string(),
            "2020-07-01 12:30:00"
        );
    }

    #[test]
    fn test_startup_fires_once() {
        let now = NaiveDateTime::parse_from_str("2020-07-01 11:59:59", "%Y-%m-%d %H:%M:%S").unwrap();
        let mut binding = TimeBinding::new(spec(), "startup", now).unwrap();
        assert!(binding.take_symbolic(&Schedule::Shutdown).is_none());
        assert_eq!(
            binding.take_symbolic(&Schedule::Startup).unwrap()["trigger_time"],
            json!("startup")
        );
        assert!(binding.take_symbolic(&Schedule::Startup).is_none());
    }
}
