//! Global contexts: loading, reloading and unloading script units
//!
//! A global context is everything one script unit contributes: its
//! module-level globals, its services and its trigger bindings. Installing a
//! unit swaps all of that in for the previous generation of the same name
//! while other contexts stay untouched.

use autoscript_core::{Context, ServiceCall};
use autoscript_service_registry::{FieldDescription, ServiceDescription, ServiceError, ServiceResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{EngineConfig, RELOAD_SERVICE};
use crate::decorator;
use crate::describe::describe;
use crate::error::{CompileError, EngineError, EngineResult};
use crate::function::{Bindings, CompiledUnit, ScriptLoader};
use crate::globals::Globals;
use crate::host::ScriptHost;
use crate::spec::{FunctionSpec, SharedFunctionSpec};
use crate::task_manager::{StartOutcome, TaskManager, TaskOutcome};
use crate::trigger_engine::TriggerEngine;

/// Result of asking for one context to be reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded { generation: u64 },
    /// The loader no longer has the unit, so the context was unloaded
    Unloaded,
    /// No such context is loaded; nothing changed
    NotFound,
}

struct LoadedContext {
    generation: u64,
    specs: Vec<SharedFunctionSpec>,
    /// Service names this generation registered
    services: Vec<String>,
}

#[derive(Default)]
struct Contexts {
    loaded: BTreeMap<String, LoadedContext>,
    /// Last generation handed out per name, kept across unloads
    generations: HashMap<String, u64>,
    /// Which context currently owns each service name
    service_owners: HashMap<String, String>,
}

pub struct GlobalContextManager {
    host: ScriptHost,
    config: EngineConfig,
    triggers: Arc<TriggerEngine>,
    tasks: Arc<TaskManager>,
    contexts: Mutex<Contexts>,
}

impl GlobalContextManager {
    pub fn new(
        host: ScriptHost,
        config: EngineConfig,
        triggers: Arc<TriggerEngine>,
        tasks: Arc<TaskManager>,
    ) -> Self {
        Self {
            host,
            config,
            triggers,
            tasks,
            contexts: Mutex::new(Contexts::default()),
        }
    }

    /// Install `unit` as a new generation, loading or replacing it
    ///
    /// Once the host has started, the unit's startup triggers fire here and
    /// need a tokio runtime; outside one they are logged and skipped.
    pub fn load_context(&self, unit: CompiledUnit) -> u64 {
        let mut contexts = self.contexts.lock();
        self.install(&mut contexts, unit)
    }

    /// Replace an already loaded context; unknown names change nothing
    pub fn reload_context(&self, unit: CompiledUnit) -> ReloadOutcome {
        let mut contexts = self.contexts.lock();
        if !contexts.loaded.contains_key(&unit.name) {
            self.log_not_found(&unit.name);
            return ReloadOutcome::NotFound;
        }
        let generation = self.install(&mut contexts, unit);
        ReloadOutcome::Reloaded { generation }
    }

    /// Remove a context's triggers and services and release its task slots
    #[instrument(skip(self))]
    pub fn unload_context(&self, name: &str) -> bool {
        let mut contexts = self.contexts.lock();
        let Some(loaded) = contexts.loaded.remove(name) else {
            return false;
        };
        self.triggers.unregister_context(name);
        for service in &loaded.services {
            self.unregister_owned(&mut contexts, name, service);
        }
        self.tasks.release_context(name);
        info!(context = name, generation = loaded.generation, "Unloaded global context");
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contexts.lock().loaded.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.contexts.lock().loaded.keys().cloned().collect()
    }

    /// Generation currently installed for `name`
    pub fn generation(&self, name: &str) -> Option<u64> {
        self.contexts.lock().loaded.get(name).map(|c| c.generation)
    }

    /// Service description of one function in a loaded context
    pub fn describe(&self, context: &str, function: &str) -> Option<ServiceDescription> {
        let contexts = self.contexts.lock();
        contexts
            .loaded
            .get(context)?
            .specs
            .iter()
            .find(|spec| spec.name() == function)
            .map(|spec| describe(&spec.function, &self.config.domain))
    }

    /// Compile `name` through `loader` and install it
    pub fn load_from(&self, loader: &dyn ScriptLoader, name: &str) -> EngineResult<u64> {
        match loader.load(name) {
            None => Err(EngineError::UnitNotFound(name.to_string())),
            Some(Err(err)) => {
                error!("{}", err);
                Err(err.into())
            }
            Some(Ok(unit)) => Ok(self.load_context(unit)),
        }
    }

    /// Recompile one loaded context through `loader`
    ///
    /// A compile error is returned and logged; the running generation stays.
    pub fn reload_from(&self, loader: &dyn ScriptLoader, name: &str) -> Result<ReloadOutcome, CompileError> {
        if !self.contains(name) {
            self.log_not_found(name);
            return Ok(ReloadOutcome::NotFound);
        }
        match loader.load(name) {
            None => {
                warn!(context = name, "Unit no longer available; unloading");
                self.unload_context(name);
                Ok(ReloadOutcome::Unloaded)
            }
            Some(Err(err)) => {
                error!("{}", err);
                Err(err)
            }
            Some(Ok(unit)) => Ok(self.reload_context(unit)),
        }
    }

    /// Bring the loaded set in line with everything `loader` lists
    ///
    /// Returns how many units were installed.
    pub fn reload_all(&self, loader: &dyn ScriptLoader) -> usize {
        let available = loader.unit_names();
        for name in self.names() {
            if !available.contains(&name) {
                self.unload_context(&name);
            }
        }

        let mut installed = 0;
        for name in &available {
            match loader.load(name) {
                None => warn!(context = %name, "Listed unit could not be found"),
                Some(Err(err)) => error!("{}", err),
                Some(Ok(unit)) => {
                    self.load_context(unit);
                    installed += 1;
                }
            }
        }
        info!(installed, listed = available.len(), "Reloaded all global contexts");
        installed
    }

    /// Register the builtin `{domain}.reload` service
    ///
    /// Takes an optional `global_ctx` naming the single context to reload.
    pub fn register_reload_service(self: &Arc<Self>, loader: Arc<dyn ScriptLoader>) {
        let description = ServiceDescription::new(&self.config.domain, RELOAD_SERVICE)
            .with_description("Reload script units")
            .with_field(
                "global_ctx",
                FieldDescription {
                    description: "only reload this global context".to_string(),
                    example: Some("file.example".to_string()),
                },
            );
        let manager: Weak<Self> = Arc::downgrade(self);

        self.host
            .services
            .register_with_description(description, move |call: ServiceCall| {
                let manager = manager.clone();
                let loader = loader.clone();
                async move {
                    let Some(manager) = manager.upgrade() else {
                        return Err(ServiceError::CallFailed("engine is shut down".to_string()));
                    };
                    match call.get::<String>("global_ctx") {
                        Some(name) => {
                            manager
                                .reload_from(loader.as_ref(), &name)
                                .map_err(|err| ServiceError::CallFailed(err.to_string()))?;
                        }
                        None => {
                            manager.reload_all(loader.as_ref());
                        }
                    }
                    Ok(None)
                }
            });
    }

    fn log_not_found(&self, name: &str) {
        error!(
            "{}.{}: no global context '{}' to reload",
            self.config.domain, RELOAD_SERVICE, name
        );
    }

    #[instrument(skip_all, fields(context = %unit.name))]
    fn install(&self, contexts: &mut Contexts, unit: CompiledUnit) -> u64 {
        let name = unit.name;
        let generation = {
            let counter = contexts.generations.entry(name.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let globals = Globals::new(generation, unit.globals);

        let specs: Vec<SharedFunctionSpec> = unit
            .functions
            .into_iter()
            .map(|function| {
                let decorators = decorator::process(&function, &name, &self.config);
                Arc::new(FunctionSpec {
                    context: name.clone(),
                    generation,
                    function,
                    service: decorators.service,
                    triggers: decorators.triggers,
                    active: decorators.active,
                    unique: decorators.unique,
                    globals: globals.clone(),
                })
            })
            .collect();

        // new services first, so a name kept across generations is never missing
        let mut services = Vec::new();
        for spec in specs.iter().filter(|spec| spec.service.is_some()) {
            let service = spec.name().to_string();
            if let Some(owner) = contexts.service_owners.get(&service) {
                if owner != &name {
                    warn!(
                        "{}.{} from {} replaces the one from {}",
                        self.config.domain, service, name, owner
                    );
                }
            }
            self.register_service(spec.clone());
            contexts.service_owners.insert(service.clone(), name.clone());
            services.push(service);
        }
        let stale: Vec<String> = contexts
            .loaded
            .get(&name)
            .map(|old| {
                old.services
                    .iter()
                    .filter(|s| !services.contains(s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for service in &stale {
            self.unregister_owned(contexts, &name, service);
        }

        let bindings = self.triggers.register_context(&name, generation, &specs);
        info!(
            generation,
            functions = specs.iter().filter(|s| s.is_registrable()).count(),
            services = services.len(),
            bindings,
            "Loaded global context"
        );
        contexts.loaded.insert(
            name,
            LoadedContext {
                generation,
                specs,
                services,
            },
        );
        generation
    }

    fn unregister_owned(&self, contexts: &mut Contexts, context: &str, service: &str) {
        if contexts.service_owners.get(service).map(String::as_str) == Some(context) {
            contexts.service_owners.remove(service);
            self.host.services.unregister(&self.config.domain, service);
        }
    }

    fn register_service(&self, spec: SharedFunctionSpec) {
        let description = describe(&spec.function, &self.config.domain);
        let tasks = self.tasks.clone();
        self.host
            .services
            .register_with_description(description, move |call: ServiceCall| {
                run_service(tasks.clone(), spec.clone(), call)
            });
    }
}

/// Run a `@service` function and complete when its task does
async fn run_service(tasks: Arc<TaskManager>, spec: SharedFunctionSpec, call: ServiceCall) -> ServiceResult {
    let mut bindings: Bindings = call.kwargs().into_iter().collect();
    bindings.insert("trigger_type".to_string(), json!("service"));
    bindings.insert(
        "context".to_string(),
        serde_json::to_value(&call.context).unwrap_or(Value::Null),
    );

    let cause: &Context = &call.context;
    match tasks.start(&spec, bindings, cause) {
        StartOutcome::Started(ticket) => match ticket.wait().await {
            TaskOutcome::Completed => Ok(None),
            TaskOutcome::Failed(err) => Err(ServiceError::CallFailed(err.to_string())),
            TaskOutcome::Cancelled => Err(ServiceError::CallFailed(format!(
                "{} was cancelled",
                spec.qualified()
            ))),
        },
        StartOutcome::Discarded => {
            debug!(function = %spec.qualified(), "Service call discarded; task already running");
            Ok(None)
        }
    }
}
