//! Broadcast event bus for distributing `EngineEvent` to subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers plus synchronous listeners keyed by `EventType`.
//! Publishing with nobody listening is a no-op.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use devflow_types::event::{EngineEvent, EventType};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Callback invoked for every published event of the type it registered for.
pub type EventListener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Handle returned by [`EventBus::add_listener`], used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// Multi-consumer event bus for engine lifecycle events.
///
/// Cloning the bus clones the sender and shares the listener table, allowing
/// multiple producers and consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    listeners: Arc<DashMap<EventType, Vec<(ListenerId, EventListener)>>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(DashMap::new()),
        }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Register a listener for one event type.
    pub fn add_listener(&self, event_type: EventType, listener: EventListener) -> ListenerId {
        let id = ListenerId(Uuid::now_v7());
        self.listeners
            .entry(event_type)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(lid, _)| *lid != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Publish an event to listeners of its type, then to all subscribers.
    ///
    /// A panicking listener is logged and does not affect the others.
    pub fn publish(&self, event: EngineEvent) {
        let event_type = event.event_type();
        // Clone the listener list so no shard lock is held while calling out.
        let listeners: Vec<EventListener> = self
            .listeners
            .get(&event_type)
            .map(|entry| entry.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(event_type = %event_type, "event listener panicked");
            }
        }

        let _ = self.sender.send(event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .field("listener_types", &self.listeners.len())
            .finish()
    }
}
