//! In-memory script loader
//!
//! Units are stored already compiled (or as a compile error) and can be
//! swapped between reloads.

use autoscript_engine::{CompileError, CompiledUnit, ScriptLoader};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct FakeLoader {
    units: Arc<Mutex<BTreeMap<String, Result<CompiledUnit, CompileError>>>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(self, unit: CompiledUnit) -> Self {
        self.set(unit);
        self
    }

    /// Add or replace a unit under its own name
    pub fn set(&self, unit: CompiledUnit) {
        self.units.lock().unwrap().insert(unit.name.clone(), Ok(unit));
    }

    /// Make the next load of `name` fail to compile
    pub fn set_error(&self, name: &str, err: CompileError) {
        self.units.lock().unwrap().insert(name.to_string(), Err(err));
    }

    pub fn remove(&self, name: &str) {
        self.units.lock().unwrap().remove(name);
    }

    pub fn shared(&self) -> Arc<dyn ScriptLoader> {
        Arc::new(self.clone())
    }
}

impl ScriptLoader for FakeLoader {
    fn unit_names(&self) -> Vec<String> {
        self.units.lock().unwrap().keys().cloned().collect()
    }

    fn load(&self, name: &str) -> Option<Result<CompiledUnit, CompileError>> {
        self.units.lock().unwrap().get(name).cloned()
    }
}
