//! Error types for expression evaluation

use thiserror::Error;

pub type ExprResult<T> = Result<T, ExprError>;

#[derive(Debug, Clone, Error)]
pub enum ExprError {
    #[error("invalid expression '{source_text}': {message}")]
    Syntax { source_text: String, message: String },

    #[error("name '{name}' is not defined")]
    Undefined { name: String },

    #[error("failed to evaluate '{source_text}': {message}")]
    Eval { source_text: String, message: String },
}

impl ExprError {
    pub(crate) fn from_minijinja(source_text: &str, err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => ExprError::Syntax {
                source_text: source_text.to_string(),
                message: err.to_string(),
            },
            minijinja::ErrorKind::UndefinedError => ExprError::Undefined {
                name: source_text.to_string(),
            },
            _ => ExprError::Eval {
                source_text: source_text.to_string(),
                message: err.to_string(),
            },
        }
    }
}
