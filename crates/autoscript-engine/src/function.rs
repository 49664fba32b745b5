//! Compiled script units as handed over by the compiler
//!
//! Compiling source text is the host's job. What the engine receives is a
//! [`CompiledUnit`]: initial module-level variables plus functions, each with
//! its declared parameters, doc string, decorator applications in source
//! order, and an async body.

use autoscript_core::{Context, State};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CompileError, FunctionError};
use crate::globals::Globals;
use crate::host::ScriptHost;

/// Keyword arguments passed to a function, in binding order
pub type Bindings = IndexMap<String, Value>;

pub type FunctionFuture = BoxFuture<'static, Result<(), FunctionError>>;

pub type FunctionBody = Arc<dyn Fn(Invocation) -> FunctionFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

/// One decorator application, e.g. `@task_unique("door", kill_me=True)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecoratorCall {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

impl DecoratorCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }
}

#[derive(Clone)]
pub struct CompiledFunction {
    pub name: String,
    pub params: Vec<Param>,
    /// Declares `**kwargs`
    pub var_kwargs: bool,
    pub doc: Option<String>,
    pub decorators: Vec<DecoratorCall>,
    pub body: FunctionBody,
}

impl CompiledFunction {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FunctionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            var_kwargs: false,
            doc: None,
            decorators: Vec::new(),
            body: Arc::new(move |inv| Box::pin(body(inv)) as FunctionFuture),
        }
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn var_kwargs(mut self) -> Self {
        self.var_kwargs = true;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn decorator(mut self, call: DecoratorCall) -> Self {
        self.decorators.push(call);
        self
    }

    /// Map trigger bindings onto the declared parameters
    ///
    /// A declared parameter takes the binding of the same name, else its
    /// default, else it is left out. Bindings with no matching parameter are
    /// passed through only when the function declares `**kwargs`.
    pub fn bind(&self, available: &Bindings) -> Bindings {
        let mut bound = Bindings::new();
        for param in &self.params {
            if let Some(value) = available.get(&param.name).or(param.default.as_ref()) {
                bound.insert(param.name.clone(), value.clone());
            }
        }
        if self.var_kwargs {
            for (name, value) in available {
                if !bound.contains_key(name) {
                    bound.insert(name.clone(), value.clone());
                }
            }
        }
        bound
    }
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("var_kwargs", &self.var_kwargs)
            .field("decorators", &self.decorators)
            .finish_non_exhaustive()
    }
}

/// One script unit: a named global context's worth of bindings
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub name: String,
    pub globals: IndexMap<String, Value>,
    pub functions: Vec<CompiledFunction>,
}

impl CompiledUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            globals: IndexMap::new(),
            functions: Vec::new(),
        }
    }

    pub fn global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn function(mut self, function: CompiledFunction) -> Self {
        self.functions.push(function);
        self
    }
}

/// Compiler and unit discovery, supplied by the host
pub trait ScriptLoader: Send + Sync {
    /// Names of every unit currently available, e.g. `file.hello`
    fn unit_names(&self) -> Vec<String>;

    /// Compile one unit; `None` when no such unit exists
    fn load(&self, name: &str) -> Option<Result<CompiledUnit, CompileError>>;
}

/// Everything a running function body gets
pub struct Invocation {
    /// `context.function`
    pub function: String,
    pub kwargs: Bindings,
    pub globals: Globals,
    pub host: ScriptHost,
    /// Context of this run, a child of whatever caused it
    pub context: Context,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.kwargs.get(name).and_then(Value::as_str)
    }

    pub fn get_state(&self, var_name: &str) -> Option<String> {
        self.host.states.get_state(var_name)
    }

    pub fn set_state(&self, var_name: &str, value: impl Into<Value>) -> Result<State, FunctionError> {
        Ok(self
            .host
            .states
            .set_value(var_name, &value.into(), self.context.clone())?)
    }

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
    ) -> Result<Option<Value>, FunctionError> {
        Ok(self
            .host
            .services
            .call(domain, service, data, self.context.clone())
            .await?)
    }

    /// Suspend the body; cancelling the task interrupts the sleep
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("function", &self.function)
            .field("kwargs", &self.kwargs)
            .field("generation", &self.globals.generation())
            .finish_non_exhaustive()
    }
}
