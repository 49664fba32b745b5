//! Trigger expressions
//!
//! Trigger conditions, active guards and event predicates are small
//! expressions such as `autoscript.door == 'open' and sensor.temp | int > 20`.
//! They are evaluated with minijinja against a scope where every
//! `domain.name` resolves to the current value of that state variable.

mod engine;
mod error;
mod scope;

pub use engine::{ExprEngine, watched_vars};
pub use error::{ExprError, ExprResult};
pub use scope::StateScope;
