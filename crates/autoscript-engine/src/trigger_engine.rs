//! Trigger engine
//!
//! Holds every armed trigger binding, partitioned by global context, and
//! turns bus events and clock ticks into task starts. The registry sits
//! behind a single mutex that is never held across an `.await`: replacing a
//! context's bindings, dispatching one notification, and the task starts it
//! causes all happen inside one critical section, so a notification is
//! always evaluated against either the whole old generation or the whole new
//! one.

use autoscript_core::events::{StateChangedData, HOST_STARTED, HOST_STOP, STATE_CHANGED};
use autoscript_core::Context;
use autoscript_event_bus::BusEvent;
use autoscript_expr::ExprEngine;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::TriggerError;
use crate::function::Bindings;
use crate::host::ScriptHost;
use crate::schedule::Schedule;
use crate::spec::{FunctionSpec, SharedFunctionSpec, TriggerSpec};
use crate::task_manager::{StartOutcome, TaskManager, TaskTicket};
use crate::trigger_eval::{EventBinding, StateBinding, TimeBinding};

#[derive(Default)]
struct ContextTriggers {
    generation: u64,
    state: Vec<StateBinding>,
    time: Vec<TimeBinding>,
    event: Vec<EventBinding>,
}

impl ContextTriggers {
    fn len(&self) -> usize {
        self.state.len() + self.time.len() + self.event.len()
    }
}

#[derive(Default)]
struct Registry {
    contexts: BTreeMap<String, ContextTriggers>,
}

pub struct TriggerEngine {
    host: ScriptHost,
    expr: ExprEngine,
    tasks: Arc<TaskManager>,
    registry: Mutex<Registry>,
    tick: Duration,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl TriggerEngine {
    pub fn new(host: ScriptHost, tasks: Arc<TaskManager>, tick: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            expr: ExprEngine::new(host.states.clone()),
            host,
            tasks,
            registry: Mutex::new(Registry::default()),
            tick,
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Arm `specs` as `context`'s triggers, replacing any previous generation
    ///
    /// A trigger that cannot be armed (bad schedule or expression) is logged
    /// and skipped. When the host has already started, startup triggers of
    /// the new generation fire right away. Returns the number of bindings.
    #[instrument(skip(self, specs))]
    pub fn register_context(&self, context: &str, generation: u64, specs: &[SharedFunctionSpec]) -> usize {
        let now = self.host.clock.now();
        let mut triggers = ContextTriggers {
            generation,
            ..Default::default()
        };

        for spec in specs {
            if let Some(guard) = &spec.active {
                if let Err(err) = self.expr.check(&guard.expr) {
                    error!("{}: @state_active {}", spec.qualified(), err);
                }
            }
            for trigger in &spec.triggers {
                match trigger {
                    TriggerSpec::State(t) => {
                        match StateBinding::new(spec.clone(), t.clone(), &self.expr) {
                            Ok(binding) => triggers.state.push(binding),
                            Err(err) => skip_trigger(spec, trigger, &err),
                        }
                    }
                    TriggerSpec::Event(t) => {
                        match EventBinding::new(spec.clone(), t.clone(), &self.expr) {
                            Ok(binding) => triggers.event.push(binding),
                            Err(err) => skip_trigger(spec, trigger, &err),
                        }
                    }
                    TriggerSpec::Time(t) => {
                        for source in &t.schedules {
                            match TimeBinding::new(spec.clone(), source, now) {
                                Ok(binding) => triggers.time.push(binding),
                                Err(err) => skip_trigger(spec, trigger, &err),
                            }
                        }
                    }
                }
            }
        }

        let count = triggers.len();
        let mut registry = self.registry.lock();
        let replaced = registry.contexts.insert(context.to_string(), triggers);
        if let Some(old) = replaced {
            debug!(old_generation = old.generation, "Dropped previous generation's triggers");
        }
        if self.host.is_started() {
            if let Some(triggers) = registry.contexts.get_mut(context) {
                self.fire_symbolic(triggers, &Schedule::Startup);
            }
        }
        info!(context, generation, bindings = count, "Registered triggers");
        count
    }

    /// Disarm every trigger of `context`
    #[instrument(skip(self))]
    pub fn unregister_context(&self, context: &str) -> bool {
        let removed = self.registry.lock().contexts.remove(context).is_some();
        if removed {
            info!(context, "Unregistered triggers");
        }
        removed
    }

    pub fn contexts(&self) -> Vec<String> {
        self.registry.lock().contexts.keys().cloned().collect()
    }

    /// Generation and binding count currently armed for `context`
    pub fn context_bindings(&self, context: &str) -> Option<(u64, usize)> {
        self.registry
            .lock()
            .contexts
            .get(context)
            .map(|t| (t.generation, t.len()))
    }

    /// Evaluate one bus event against every binding, in registry order
    pub fn dispatch(&self, event: &BusEvent) {
        trace!(event_type = %event.event_type, "Dispatching event");
        let mut registry = self.registry.lock();

        match event.event_type.as_str() {
            STATE_CHANGED => match serde_json::from_value::<StateChangedData>(event.data.clone()) {
                Ok(change) => {
                    for triggers in registry.contexts.values_mut() {
                        for binding in triggers.state.iter_mut() {
                            if let Some(bindings) = binding.on_change(&change, &self.expr) {
                                self.fire(&binding.spec, bindings, &event.context);
                            }
                        }
                    }
                }
                Err(err) => warn!(error = %err, "Malformed state_changed payload"),
            },
            HOST_STARTED => {
                for triggers in registry.contexts.values_mut() {
                    self.fire_symbolic(triggers, &Schedule::Startup);
                }
            }
            HOST_STOP => {
                for triggers in registry.contexts.values_mut() {
                    self.fire_symbolic(triggers, &Schedule::Shutdown);
                }
            }
            _ => {}
        }

        for triggers in registry.contexts.values() {
            for binding in &triggers.event {
                if let Some(bindings) =
                    binding.on_event(event.event_type.as_str(), &event.data, &self.expr)
                {
                    self.fire(&binding.spec, bindings, &event.context);
                }
            }
        }
    }

    /// Fire every time binding whose next fire time has been reached
    pub fn fire_due(&self) -> usize {
        let now = self.host.clock.now();
        let mut registry = self.registry.lock();
        let mut fired = 0;
        for triggers in registry.contexts.values_mut() {
            for binding in triggers.time.iter_mut() {
                if let Some(bindings) = binding.take_due(now) {
                    fired += 1;
                    self.fire(&binding.spec, bindings, &Context::new());
                }
            }
        }
        fired
    }

    /// Earliest pending clock-driven fire time
    pub fn next_deadline(&self) -> Option<NaiveDateTime> {
        self.registry
            .lock()
            .contexts
            .values()
            .flat_map(|t| t.time.iter().filter_map(TimeBinding::next_fire))
            .min()
    }

    /// Fire every shutdown binding that has not fired yet this generation
    ///
    /// Returns the tickets of the tasks started.
    pub fn fire_shutdown(&self) -> Vec<TaskTicket> {
        let mut registry = self.registry.lock();
        registry
            .contexts
            .values_mut()
            .flat_map(|triggers| self.fire_symbolic(triggers, &Schedule::Shutdown))
            .collect()
    }

    fn fire_symbolic(&self, triggers: &mut ContextTriggers, which: &Schedule) -> Vec<TaskTicket> {
        let mut tickets = Vec::new();
        for binding in triggers.time.iter_mut() {
            if let Some(bindings) = binding.take_symbolic(which) {
                tickets.extend(self.fire(&binding.spec, bindings, &Context::new()));
            }
        }
        tickets
    }

    fn fire(&self, spec: &Arc<FunctionSpec>, bindings: Bindings, cause: &Context) -> Option<TaskTicket> {
        if let Some(guard) = &spec.active {
            match self.expr.eval_bool(&guard.expr) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(function = %spec.qualified(), "Suppressed by @state_active");
                    return None;
                }
                Err(err) => {
                    warn!(
                        "{}: @state_active '{}' evaluation failed: {}",
                        spec.qualified(),
                        guard.expr,
                        err
                    );
                    return None;
                }
            }
        }

        match self.tasks.start(spec, bindings, cause) {
            StartOutcome::Started(ticket) => {
                debug!(function = %spec.qualified(), task_id = ticket.id(), "Trigger fired");
                Some(ticket)
            }
            StartOutcome::Discarded => {
                debug!(function = %spec.qualified(), "Trigger fired but task was discarded");
                None
            }
        }
    }

    fn until_next_check(&self) -> Duration {
        match self.next_deadline() {
            Some(deadline) => (deadline - self.host.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.tick),
            None => self.tick,
        }
    }

    /// Subscribe to the bus and run the dispatch loop in the background
    ///
    /// The subscription is made before returning, so every event fired after
    /// `start` is seen.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Trigger engine already running");
            return;
        }
        info!("Starting trigger engine");

        let mut event_rx = self.host.bus.subscribe_all();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let engine = self.clone();

        tokio::spawn(async move {
            loop {
                let wait = engine.until_next_check();
                tokio::select! {
                    event = event_rx.recv() => match event {
                        Ok(event) => engine.dispatch(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Trigger engine lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, stopping trigger engine");
                            break;
                        }
                    },
                    _ = tokio::time::sleep(wait) => {
                        engine.fire_due();
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                }
            }
            engine.running.store(false, Ordering::SeqCst);
            info!("Trigger engine stopped");
        });
    }

    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        info!("Stopping trigger engine");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn skip_trigger(spec: &FunctionSpec, trigger: &TriggerSpec, err: &TriggerError) {
    error!("{}: @{} {}; skipping trigger", spec.qualified(), trigger.kind(), err);
}
