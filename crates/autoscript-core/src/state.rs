//! Snapshot of one state variable

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, VarName};

/// Current value of a state variable plus its attributes
///
/// Values are always strings. Scripts that write numbers or lists store their
/// display form, see [`State::render_value`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub var_name: VarName,

    pub value: String,

    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// Last time `value` actually changed
    pub last_changed: DateTime<Utc>,

    /// Last write, even one that kept the same value
    pub last_updated: DateTime<Utc>,

    pub context: Context,
}

impl State {
    pub fn new(
        var_name: VarName,
        value: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            var_name,
            value: value.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            context,
        }
    }

    /// Successor state; `last_changed` only moves if the value differs
    pub fn with_update(
        &self,
        value: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let value = value.into();
        let last_changed = if value != self.value {
            now
        } else {
            self.last_changed
        };

        Self {
            var_name: self.var_name.clone(),
            value,
            attributes,
            last_changed,
            last_updated: now,
            context,
        }
    }

    /// String form stored for a written JSON value
    ///
    /// Strings are stored as-is, everything else in its JSON text form
    /// (`1`, `true`, `[5,"a"]`).
    pub fn render_value(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for State {
    // Timestamps and context don't take part in equality
    fn eq(&self, other: &Self) -> bool {
        self.var_name == other.var_name
            && self.value == other.value
            && self.attributes == other.attributes
    }
}
