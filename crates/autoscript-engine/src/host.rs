//! Collaborators the engine runs against

use autoscript_core::events::{HOST_STARTED, HOST_STOP};
use autoscript_core::{Context, Event};
use autoscript_event_bus::EventBus;
use autoscript_service_registry::ServiceRegistry;
use autoscript_state_store::StateStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SharedClock, SystemClock};

/// Event bus, state store, service registry and clock of the embedding host
///
/// Cloning is cheap; every clone shares the same collaborators.
#[derive(Clone)]
pub struct ScriptHost {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
    pub clock: SharedClock,
    started: Arc<AtomicBool>,
}

impl ScriptHost {
    /// In-memory collaborators wired together, reading time from `clock`
    pub fn new(clock: impl Clock) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::with_event_bus(bus.clone()));
        Self::from_parts(bus, states, services, Arc::new(clock))
    }

    pub fn system() -> Self {
        Self::new(SystemClock)
    }

    pub fn from_parts(
        bus: Arc<EventBus>,
        states: Arc<StateStore>,
        services: Arc<ServiceRegistry>,
        clock: SharedClock,
    ) -> Self {
        Self {
            bus,
            states,
            services,
            clock,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether [`signal_started`](Self::signal_started) has been called
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Mark the host as started and fire `host_started`
    pub fn signal_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Host started");
        self.bus.fire(Event::new(
            HOST_STARTED,
            serde_json::Value::Object(Default::default()),
            Context::new(),
        ));
    }

    /// Fire `host_stop`
    pub fn signal_stop(&self) {
        info!("Host stopping");
        self.bus.fire(Event::new(
            HOST_STOP,
            serde_json::Value::Object(Default::default()),
            Context::new(),
        ));
    }
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("states", &self.states.len())
            .field("services", &self.services.service_count())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
