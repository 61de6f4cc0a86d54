use async_trait::async_trait;

use crate::events::Event;

/// Contract for observability consumers.
///
/// Called from a dedicated worker task; implementations may be slow (I/O,
/// batching) without delaying delivery on the bus.
///
/// ## Example
/// ```rust
/// use async_trait::async_trait;
/// use switchboard::{Event, EventKind, Observe};
///
/// struct DeadLetterAlarm;
///
/// #[async_trait]
/// impl Observe for DeadLetterAlarm {
///     async fn on_event(&self, ev: &Event) {
///         if ev.kind == EventKind::DeadLettered {
///             // page someone
///         }
///     }
///     fn name(&self) -> &'static str { "dead-letter-alarm" }
/// }
/// ```
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this observer's queue. Events beyond it are dropped.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
