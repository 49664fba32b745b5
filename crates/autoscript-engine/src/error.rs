//! Error types for the engine

use autoscript_core::VarNameError;
use autoscript_expr::ExprError;
use autoscript_service_registry::ServiceError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::schedule::ScheduleError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("script unit '{0}' not found")]
    UnitNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A script unit failed to compile; nothing from it is registered
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message} ({file}, line {line})")]
pub struct CompileError {
    pub kind: String,
    pub message: String,
    pub file: String,
    pub line: usize,
}

impl CompileError {
    pub fn syntax(file: impl Into<String>, line: usize) -> Self {
        Self {
            kind: "SyntaxError".to_string(),
            message: "invalid syntax".to_string(),
            file: file.into(),
            line,
        }
    }
}

/// Error raised by a function body
#[derive(Debug, Clone, Error)]
pub enum FunctionError {
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },

    #[error("Panic: {0}")]
    Panic(String),

    #[error("NameError: {0}")]
    VarName(#[from] VarNameError),

    #[error("ServiceError: {0}")]
    Service(#[from] ServiceError),
}

impl FunctionError {
    pub fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        FunctionError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A malformed decorator application; only that decorator is dropped
///
/// The display form is the tail of the log line that names the function,
/// context and decorator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoratorError {
    #[error("is not a known decorator; ignoring decorator")]
    Unknown,

    #[error("takes no arguments; ignoring decorator")]
    TakesNoArguments,

    #[error("got {got} arguments, expected {expected}; ignoring decorator")]
    WrongArgCount { got: usize, expected: &'static str },

    #[error("argument {position} should be a string; ignoring decorator")]
    NotAString { position: usize },

    #[error("doesn't take keyword arguments; ignored")]
    NoKeywords,

    #[error("keyword argument {name} should be a {expected}; ignoring decorator")]
    KeywordType { name: String, expected: &'static str },
}

/// A trigger spec that could not be armed
#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("invalid expression: {0}")]
    Expr(#[from] ExprError),
}
