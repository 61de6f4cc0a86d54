//! # Observability events emitted by the bus and the supervisor.
//!
//! [`EventKind`] falls into three groups:
//! - **Delivery outcomes**: what happened to one envelope at one subscription
//! - **Service lifecycle**: supervisor state transitions
//! - **Observer health**: overflow/panic inside the observer fan-out itself
//!
//! ## Ordering
//! Every event carries a process-wide monotonic `seq`; use it to restore
//! order when observers see events from different workers interleaved.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use switchboard::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_topic("TTS.Request")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_millis(500))
//!     .with_reason("engine busy");
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.topic.as_deref(), Some("TTS.Request"));
//! assert_eq!(ev.delay_ms, Some(500));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::envelope::{Envelope, EnvelopeId, MessageKind};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of observability events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Bus lifecycle ===
    /// The bus started its delivery workers.
    BusStarted,
    /// The bus stopped. `reason` holds the number of deliveries cancelled, if any.
    BusStopped,

    // === Delivery outcomes ===
    /// An envelope was accepted by `publish`/`request`.
    ///
    /// Sets: `envelope`, `topic`, `message`.
    Published,
    /// No subscription matched. Not a failure for Events/Commands; Queries fail fast.
    ///
    /// Sets: `envelope`, `topic`, `message`.
    NoSubscribers,
    /// A handler returned successfully.
    ///
    /// Sets: `envelope`, `topic`, `subscription`, `attempt`.
    Delivered,
    /// A handler returned an error or panicked.
    ///
    /// Sets: `envelope`, `topic`, `subscription`, `attempt`, `reason`.
    HandlerFailed,
    /// A Command will be redelivered after `delay_ms`.
    ///
    /// Sets: `envelope`, `topic`, `subscription`, `attempt`, `delay_ms`, `reason`.
    RetryScheduled,
    /// A Command exhausted its attempts and moved to the dead-letter set.
    ///
    /// Sets: `envelope`, `topic`, `subscription`, `attempt`, `reason`.
    DeadLettered,
    /// The envelope's deadline passed before dispatch; it was not delivered.
    ///
    /// Sets: `envelope`, `topic`, `subscription`.
    Expired,
    /// The envelope was discarded (queue full, subscription removed, bus stopping).
    ///
    /// Sets: `envelope`, `topic`, `subscription`, `reason`.
    Dropped,

    // === Service lifecycle ===
    /// `created|failed|stopped → starting`.
    ServiceStarting,
    /// `starting → running`.
    ServiceRunning,
    /// `starting|running|stopping → failed`. Sets `reason`.
    ServiceFailed,
    /// `running → stopping`.
    ServiceStopping,
    /// `stopping → stopped`.
    ServiceStopped,
    /// `stop()` did not finish within the grace period; the service was abandoned.
    ServiceAbandoned,
    /// An automatic restart is scheduled after `delay_ms`. Sets `attempt` (restart count).
    ServiceRestartScheduled,
    /// A shutdown signal or programmatic stop request was observed.
    ShutdownRequested,

    // === Observer health ===
    /// An observer panicked while handling an event. Sets `subscription` (observer name), `reason`.
    ObserverPanicked,
    /// An observer's queue was full or closed. Sets `subscription` (observer name), `reason`.
    ObserverOverflow,
}

/// Observability event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Envelope concerned, for delivery outcomes.
    pub envelope: Option<EnvelopeId>,
    /// Envelope topic.
    pub topic: Option<Arc<str>>,
    /// Envelope kind.
    pub message: Option<MessageKind>,
    /// Subscription (handler) or observer name.
    pub subscription: Option<Arc<str>>,
    /// Service name, for lifecycle events.
    pub service: Option<Arc<str>>,
    /// Attempt count, or restart count for `ServiceRestartScheduled`.
    pub attempt: Option<u32>,
    /// Delay before the next attempt (milliseconds).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (error message, drop cause).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with the current time and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            envelope: None,
            topic: None,
            message: None,
            subscription: None,
            service: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Creates an event describing `env`: id, topic, kind and current attempt count.
    pub fn for_envelope(kind: EventKind, env: &Envelope) -> Self {
        let mut ev = Self::new(kind);
        ev.envelope = Some(env.id());
        ev.topic = Some(Arc::from(env.topic()));
        ev.message = Some(env.kind());
        ev.attempt = Some(env.attempts());
        ev
    }

    /// Creates a lifecycle event for a service.
    pub fn for_service(kind: EventKind, service: &str) -> Self {
        Self::new(kind).with_service(service)
    }

    /// Attaches a topic.
    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attaches a subscription or observer name.
    #[inline]
    pub fn with_subscription(mut self, name: impl Into<Arc<str>>) -> Self {
        self.subscription = Some(name.into());
        self
    }

    /// Attaches a service name.
    #[inline]
    pub fn with_service(mut self, name: impl Into<Arc<str>>) -> Self {
        self.service = Some(name.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Observer overflow event.
    pub(crate) fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::ObserverOverflow)
            .with_subscription(observer)
            .with_reason(reason)
    }

    /// Observer panic event.
    pub(crate) fn observer_panicked(observer: &'static str, info: String) -> Self {
        Event::new(EventKind::ObserverPanicked)
            .with_subscription(observer)
            .with_reason(info)
    }

    /// Returns `true` for events about the observer fan-out itself.
    #[inline]
    pub fn is_observer_health(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ObserverOverflow | EventKind::ObserverPanicked
        )
    }
}
