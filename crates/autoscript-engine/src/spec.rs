//! Structured specs derived from a function's decorators

use std::sync::Arc;

use crate::function::CompiledFunction;
use crate::globals::Globals;

/// Exposure as `{domain}.{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub domain: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTriggerSpec {
    /// OR'd; a bare `domain.name` fires on every change of that variable
    pub exprs: Vec<String>,
    /// Previous value the changed variable must have had
    pub from: Option<String>,
    /// New value the changed variable must have
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTriggerSpec {
    pub schedules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTriggerSpec {
    pub event_type: String,
    /// Evaluated with the event's payload fields in scope
    pub predicate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    State(StateTriggerSpec),
    Time(TimeTriggerSpec),
    Event(EventTriggerSpec),
}

impl TriggerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerSpec::State(_) => "state_trigger",
            TriggerSpec::Time(_) => "time_trigger",
            TriggerSpec::Event(_) => "event_trigger",
        }
    }
}

/// Expression that must hold at fire time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGuardSpec {
    pub expr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniquePolicy {
    /// Discard new firings while one is running
    Queue,
    /// Cancel the running task and start the new one, or with `kill_me`
    /// discard the new firing instead
    Kill { kill_me: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueSpec {
    pub group: String,
    pub policy: UniquePolicy,
}

/// Everything the engine knows about one function of one generation
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub context: String,
    pub generation: u64,
    pub function: CompiledFunction,
    pub service: Option<ServiceSpec>,
    pub triggers: Vec<TriggerSpec>,
    pub active: Option<ActiveGuardSpec>,
    pub unique: Option<UniqueSpec>,
    pub globals: Globals,
}

impl FunctionSpec {
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// `context.function`, e.g. `file.hello.func1`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.context, self.function.name)
    }

    /// Task slot key: the `task_unique` group, else the qualified name
    pub fn group(&self) -> String {
        match &self.unique {
            Some(unique) => unique.group.clone(),
            None => self.qualified(),
        }
    }

    pub fn is_registrable(&self) -> bool {
        self.service.is_some() || !self.triggers.is_empty()
    }
}

pub type SharedFunctionSpec = Arc<FunctionSpec>;
