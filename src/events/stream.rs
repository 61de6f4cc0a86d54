//! # Broadcast stream of observability events.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits on receivers.
//! - **Bounded**: one ring buffer of `capacity` events shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` events.
//! - **No persistence**: events published with no receiver are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for observability events.
///
/// Cheap to clone; every clone publishes into the same ring.
#[derive(Clone, Debug)]
pub struct EventStream {
    tx: broadcast::Sender<Event>,
}

impl EventStream {
    /// Creates a stream with the given ring capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(1024)
    }
}
