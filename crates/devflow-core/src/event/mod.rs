//! Event bus for engine lifecycle notifications.
//!
//! Provides an `EventBus` that distributes `EngineEvent` messages to broadcast
//! subscribers and to listeners registered per `EventType`.

pub mod bus;

pub use bus::{EventBus, EventListener, ListenerId};
