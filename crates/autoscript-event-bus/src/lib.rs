//! In-process event bus
//!
//! Publishers call [`EventBus::fire`]; every subscriber of that event type and
//! every match-all subscriber gets a clone. Delivery order per receiver is the
//! order of `fire` calls, which is what the trigger engine relies on to
//! process state changes in sequence.

use autoscript_core::{Context, Event, EventData, EventType};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Per-receiver buffer before a slow subscriber starts lagging
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An untyped event as it travels on the bus
pub type BusEvent = Event<serde_json::Value>;

/// Broadcast-based pub/sub keyed by event type
pub struct EventBus {
    by_type: DashMap<EventType, broadcast::Sender<BusEvent>>,
    all: broadcast::Sender<BusEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            by_type: DashMap::new(),
            all,
            capacity,
        }
    }

    /// Receive events of one type (`*` means every event)
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<BusEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing");

        if event_type.is_match_all() {
            return self.all.subscribe();
        }

        self.by_type
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receive every event regardless of type
    pub fn subscribe_all(&self) -> broadcast::Receiver<BusEvent> {
        self.all.subscribe()
    }

    /// Receive events whose payload deserializes into `T`
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Publish to type subscribers, then to match-all subscribers
    pub fn fire(&self, event: BusEvent) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.by_type.get(&event.event_type) {
            // An error only means nobody is listening right now
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Publish a typed payload
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        let event = match serde_json::to_value(&event.data) {
            Ok(json) => event.map_data(|_| json),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "Dropping unserializable event");
                return;
            }
        };
        self.fire(event);
    }

    /// Number of event types that have had a dedicated subscriber
    pub fn event_type_count(&self) -> usize {
        self.by_type.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that skips events whose payload doesn't fit `T`
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<BusEvent>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;
