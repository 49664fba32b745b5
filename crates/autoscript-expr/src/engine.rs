//! Expression engine

use crate::error::{ExprError, ExprResult};
use crate::scope::StateScope;
use autoscript_state_store::StateStore;
use minijinja::value::Value;
use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::trace;

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("valid literal regex")
    })
}

fn var_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([a-z][a-z0-9_]*)\.([a-z0-9_]+)\b").expect("valid var name regex")
    })
}

/// State variable names referenced by an expression, in first-use order
///
/// String literals are ignored and `a.b(...)` is treated as a method call,
/// not a variable.
pub fn watched_vars(source: &str) -> Vec<String> {
    let stripped = string_literal_re().replace_all(source, "''");
    let mut names: Vec<String> = Vec::new();
    for m in var_name_re().find_iter(&stripped) {
        if stripped[m.end()..].trim_start().starts_with('(') {
            continue;
        }
        let preceded_by_dot = stripped[..m.start()].ends_with('.');
        if preceded_by_dot {
            continue;
        }
        let name = m.as_str().to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Evaluates trigger expressions against the live state store
pub struct ExprEngine {
    env: Environment<'static>,
    states: Arc<StateStore>,
}

impl ExprEngine {
    pub fn new(states: Arc<StateStore>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env, states }
    }

    /// Parse without evaluating
    pub fn check(&self, source: &str) -> ExprResult<()> {
        self.env
            .compile_expression(source)
            .map(|_| ())
            .map_err(|e| ExprError::from_minijinja(source, e))
    }

    /// If the expression is nothing but a single variable name, return it
    ///
    /// Such a trigger fires on every change of that variable rather than on
    /// a false to true transition.
    pub fn bare_var(source: &str) -> Option<String> {
        let trimmed = source.trim();
        let m = var_name_re().find(trimmed)?;
        (m.start() == 0 && m.end() == trimmed.len()).then(|| trimmed.to_string())
    }

    pub fn eval(&self, source: &str) -> ExprResult<Value> {
        self.eval_in(source, StateScope::new(self.states.clone()))
    }

    /// Evaluate and take the truthiness of the result
    pub fn eval_bool(&self, source: &str) -> ExprResult<bool> {
        Ok(self.eval(source)?.is_true())
    }

    /// Evaluate with `locals` shadowing state domains of the same name
    pub fn eval_bool_with(
        &self,
        source: &str,
        locals: serde_json::Map<String, serde_json::Value>,
    ) -> ExprResult<bool> {
        let scope = StateScope::with_locals(self.states.clone(), locals);
        Ok(self.eval_in(source, scope)?.is_true())
    }

    /// Evaluate with `var_name` pinned to `value`
    ///
    /// State triggers use this to judge each change notification by the
    /// value it carries, even when the store has since moved on.
    pub fn eval_bool_with_override(
        &self,
        source: &str,
        var_name: &str,
        value: Option<&str>,
    ) -> ExprResult<bool> {
        let scope = StateScope::with_override(self.states.clone(), var_name, value);
        Ok(self.eval_in(source, scope)?.is_true())
    }

    fn eval_in(&self, source: &str, scope: StateScope) -> ExprResult<Value> {
        for name in watched_vars(source) {
            let domain = name.split('.').next().unwrap_or_default();
            if !scope.has_local(domain) && !scope.is_set(&name) {
                return Err(ExprError::Undefined { name });
            }
        }

        let expr = self
            .env
            .compile_expression(source)
            .map_err(|e| ExprError::from_minijinja(source, e))?;
        let result = expr
            .eval(Value::from_object(scope))
            .map_err(|e| ExprError::from_minijinja(source, e))?;
        trace!(expr = %source, result = %result, "Evaluated expression");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscript_core::Context;
    use autoscript_event_bus::EventBus;
    use serde_json::json;
    use std::collections::HashMap;

    fn make_engine() -> (Arc<StateStore>, ExprEngine) {
        let store = Arc::new(StateStore::new(Arc::new(EventBus::new())));
        let engine = ExprEngine::new(store.clone());
        (store, engine)
    }

    fn set(store: &StateStore, name: &str, value: &str) {
        store.set(name.parse().unwrap(), value, HashMap::new(), Context::new());
    }

    #[test]
    fn test_watched_vars() {
        assert_eq!(
            watched_vars("autoscript.a == '1' and sensor.temp | int > 3"),
            vec!["autoscript.a", "sensor.temp"]
        );
        assert_eq!(watched_vars("autoscript.a == 'x.y'"), vec!["autoscript.a"]);
        assert_eq!(watched_vars("autoscript.a.startswith('o')"), vec!["autoscript.a"]);
        assert!(watched_vars("trigger.lower() == 'x'").is_empty());
        assert_eq!(watched_vars("autoscript.a or autoscript.a"), vec!["autoscript.a"]);
        assert!(watched_vars("1.5 > 1").is_empty());
    }

    #[test]
    fn test_bare_var() {
        assert_eq!(
            ExprEngine::bare_var(" autoscript.door "),
            Some("autoscript.door".to_string())
        );
        assert_eq!(ExprEngine::bare_var("autoscript.door == 'on'"), None);
        assert_eq!(ExprEngine::bare_var("not autoscript.door"), None);
    }

    #[test]
    fn test_eval_reads_current_state() {
        let (store, engine) = make_engine();
        set(&store, "autoscript.mode", "on");
        set(&store, "sensor.temp", "23");

        assert!(engine.eval_bool("autoscript.mode == 'on'").unwrap());
        assert!(engine.eval_bool("sensor.temp | int > 20").unwrap());
        assert!(!engine.eval_bool("autoscript.mode == 'off'").unwrap());

        set(&store, "autoscript.mode", "off");
        assert!(engine.eval_bool("autoscript.mode == 'off'").unwrap());
    }

    #[test]
    fn test_unset_variable_is_an_error() {
        let (_, engine) = make_engine();
        let err = engine.eval_bool("autoscript.missing == '1'").unwrap_err();
        assert!(matches!(err, ExprError::Undefined { ref name } if name == "autoscript.missing"));
    }

    #[test]
    fn test_override_pins_one_variable() {
        let (store, engine) = make_engine();
        set(&store, "autoscript.level", "1");
        set(&store, "autoscript.other", "x");

        assert!(!engine
            .eval_bool_with_override("autoscript.level == '1'", "autoscript.level", Some("0"))
            .unwrap());
        assert!(engine
            .eval_bool_with_override(
                "autoscript.level == '0' and autoscript.other == 'x'",
                "autoscript.level",
                Some("0")
            )
            .unwrap());
        assert!(engine.eval_bool("autoscript.level == '1'").unwrap());

        let err = engine
            .eval_bool_with_override("autoscript.level == '1'", "autoscript.level", None)
            .unwrap_err();
        assert!(matches!(err, ExprError::Undefined { ref name } if name == "autoscript.level"));

        assert!(engine
            .eval_bool_with_override("autoscript.fresh == 'on'", "autoscript.fresh", Some("on"))
            .unwrap());
    }

    #[test]
    fn test_syntax_error() {
        let (_, engine) = make_engine();
        assert!(matches!(
            engine.check("autoscript.a == "),
            Err(ExprError::Syntax { .. })
        ));
        assert!(engine.check("autoscript.a == '1'").is_ok());
    }

    #[test]
    fn test_locals_shadow_state_domains() {
        let (store, engine) = make_engine();
        set(&store, "autoscript.armed", "yes");
        let locals = json!({"code": 7, "zone": "garden"})
            .as_object()
            .cloned()
            .unwrap();

        assert!(engine
            .eval_bool_with("code == 7 and zone == 'garden'", locals.clone())
            .unwrap());
        assert!(engine
            .eval_bool_with("code == 7 and autoscript.armed == 'yes'", locals)
            .unwrap());
    }
}
