//! Trigger & Global-Context Execution Engine
//!
//! Runs decorated script functions inside a host. The host compiles script
//! units; this crate takes the compiled functions, validates their
//! decorators, registers services, arms triggers and runs the resulting
//! tasks under per-function uniqueness policies.
//!
//! # Architecture
//!
//! ```text
//! ScriptLoader ─▶ GlobalContextManager ─▶ decorators ─▶ FunctionSpec
//!                        │                                   │
//!                        ▼                                   ▼
//!                 ServiceRegistry                     TriggerEngine ◀─ EventBus / Clock
//!                                                            │
//!                                                            ▼
//!                                                       TaskManager
//! ```
//!
//! # Key Types
//!
//! - [`Autoscript`] - Wires the engine to a [`ScriptHost`]
//! - [`GlobalContextManager`] - Loads, reloads and unloads script units
//! - [`TriggerEngine`] - Holds armed trigger bindings and dispatches events
//! - [`TaskManager`] - Starts function bodies and enforces uniqueness

pub mod clock;
pub mod config;
pub mod decorator;
pub mod describe;
pub mod error;
pub mod function;
pub mod global_ctx;
pub mod globals;
pub mod host;
pub mod schedule;
pub mod spec;
pub mod task_manager;
pub mod trigger_engine;
mod trigger_eval;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use config::{ConfigError, EngineConfig, RELOAD_SERVICE};
pub use decorator::{Decorator, FunctionDecorators};
pub use describe::describe;
pub use error::{
    CompileError, DecoratorError, EngineError, EngineResult, FunctionError, TriggerError,
};
pub use function::{
    Bindings, CompiledFunction, CompiledUnit, DecoratorCall, Invocation, Param, ScriptLoader,
};
pub use global_ctx::{GlobalContextManager, ReloadOutcome};
pub use globals::Globals;
pub use host::ScriptHost;
pub use schedule::{Schedule, ScheduleError};
pub use spec::{
    ActiveGuardSpec, EventTriggerSpec, FunctionSpec, ServiceSpec, SharedFunctionSpec,
    StateTriggerSpec, TimeTriggerSpec, TriggerSpec, UniquePolicy, UniqueSpec,
};
pub use task_manager::{StartOutcome, TaskId, TaskManager, TaskOutcome, TaskTicket};
pub use trigger_engine::TriggerEngine;

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// The engine, wired to one host
pub struct Autoscript {
    host: ScriptHost,
    config: EngineConfig,
    tasks: Arc<TaskManager>,
    triggers: Arc<TriggerEngine>,
    contexts: Arc<GlobalContextManager>,
}

impl Autoscript {
    pub fn new(host: ScriptHost, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let tasks = Arc::new(TaskManager::new(host.clone()));
        let triggers = Arc::new(TriggerEngine::new(
            host.clone(),
            tasks.clone(),
            config.tick_interval(),
        ));
        let contexts = Arc::new(GlobalContextManager::new(
            host.clone(),
            config.clone(),
            triggers.clone(),
            tasks.clone(),
        ));
        Ok(Self {
            host,
            config,
            tasks,
            triggers,
            contexts,
        })
    }

    /// Start dispatching, register `{domain}.reload` and load every unit
    ///
    /// Returns the number of units loaded.
    pub fn setup(&self, loader: Arc<dyn ScriptLoader>) -> usize {
        info!(domain = %self.config.domain, "Setting up script engine");
        self.triggers.start();
        self.contexts.register_reload_service(loader.clone());
        self.contexts.reload_all(loader.as_ref())
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn triggers(&self) -> &Arc<TriggerEngine> {
        &self.triggers
    }

    pub fn contexts(&self) -> &Arc<GlobalContextManager> {
        &self.contexts
    }

    /// Stop dispatching, unload every context and wait for tasks to end
    ///
    /// `time_trigger("shutdown")` functions that have not already run on a
    /// `host_stop` event are started here and awaited before the remaining
    /// tasks are cancelled.
    pub async fn shutdown(&self) {
        info!("Shutting down script engine");
        self.triggers.stop();
        let tickets = self.triggers.fire_shutdown();
        if !tickets.is_empty() {
            debug!(count = tickets.len(), "Waiting for shutdown triggers");
            join_all(tickets.into_iter().map(TaskTicket::wait)).await;
        }
        for name in self.contexts.names() {
            self.contexts.unload_context(&name);
        }
        self.host
            .services
            .unregister(&self.config.domain, RELOAD_SERVICE);
        self.tasks.shutdown().await;
    }
}
