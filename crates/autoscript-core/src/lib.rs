//! Core value types for the automation scripting engine
//!
//! Everything that crosses a crate boundary lives here: state variable names,
//! state snapshots, bus events, the causality [`Context`], and service calls.
//! The host-side collaborators (event bus, state store, service registry) and
//! the engine itself all speak these types.

mod context;
mod event;
mod service_call;
mod state;
mod var_name;

pub use context::Context;
pub use event::{Event, EventData, EventType};
pub use service_call::ServiceCall;
pub use state::State;
pub use var_name::{VarName, VarNameError};

/// Well-known event types and their payloads
pub mod events {
    use super::*;

    /// Fired by the state store on every write
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired by the host once it has finished starting
    pub const HOST_STARTED: &str = "host_started";

    /// Fired by the host when it begins shutting down
    pub const HOST_STOP: &str = "host_stop";

    /// Fired by the service registry for every call
    pub const CALL_SERVICE: &str = "call_service";

    /// Payload of a [`STATE_CHANGED`] event
    ///
    /// `old_state` is `None` when the variable is created, `new_state` is
    /// `None` when it is removed.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub var_name: VarName,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl StateChangedData {
        /// Value before the change, if the variable existed
        pub fn old_value(&self) -> Option<&str> {
            self.old_state.as_ref().map(|s| s.value.as_str())
        }

        /// Value after the change, if the variable still exists
        pub fn new_value(&self) -> Option<&str> {
            self.new_state.as_ref().map(|s| s.value.as_str())
        }
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Payload of a [`CALL_SERVICE`] event
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct CallServiceData {
        pub domain: String,
        pub service: String,
        pub service_data: serde_json::Value,
    }

    impl EventData for CallServiceData {
        fn event_type() -> &'static str {
            CALL_SERVICE
        }
    }
}
