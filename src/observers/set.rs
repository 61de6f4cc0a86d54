//! # Non-blocking fan-out of events to observers.
//!
//! ```text
//! emit_arc(event)
//!     ├──► [queue 1] ──► worker 1 ──► observer1.on_event()
//!     │    (bounded)         └──────► panic → ObserverPanicked
//!     └──► [queue N] ──► worker N ──► observerN.on_event()
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `emit_arc()` uses `try_send` and returns immediately.
//! - **Overflow**: the event is dropped for that observer only and an
//!   `ObserverOverflow` event is published (never for health events themselves).
//! - **Per-observer FIFO**, no ordering across observers.
//! - **Panic isolation**: a panic is caught, reported, and the worker continues.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::panic_info;
use crate::events::{Event, EventStream};
use crate::observers::Observe;

struct ObserverChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator owning one queue and worker per observer.
pub struct ObserverSet {
    channels: Vec<ObserverChannel>,
    workers: Vec<JoinHandle<()>>,
    stream: EventStream,
}

impl ObserverSet {
    /// Spawns one worker per observer. Health events go to `stream`.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observe>>, stream: EventStream) -> Self {
        let mut channels = Vec::with_capacity(observers.len());
        let mut workers = Vec::with_capacity(observers.len());

        for obs in observers {
            let name = obs.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(obs.queue_capacity().max(1));
            let health = stream.clone();

            workers.push(tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = obs.on_event(ev.as_ref());
                    if let Err(payload) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        health.publish(Event::observer_panicked(
                            obs.name(),
                            panic_info(payload.as_ref()),
                        ));
                    }
                }
            }));
            channels.push(ObserverChannel { name, sender: tx });
        }

        Self {
            channels,
            workers,
            stream,
        }
    }

    /// Number of observers.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns `true` when no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Delivers a shared event to every observer without blocking.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let health = event.is_observer_health();

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !health {
                self.stream
                    .publish(Event::observer_overflow(channel.name, reason));
            }
        }
    }

    /// Delivers a copy of `event` to every observer.
    pub fn emit(&self, event: &Event) {
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Closes all queues and waits for workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Observe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.seen.lock().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    #[async_trait]
    impl Observe for Panicker {
        async fn on_event(&self, _ev: &Event) {
            panic!("observer exploded");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order_to_each_observer() {
        let rec = Arc::new(Recorder::default());
        let set = ObserverSet::new(vec![rec.clone()], EventStream::new(16));

        set.emit(&Event::new(EventKind::BusStarted));
        set.emit(&Event::new(EventKind::Published));
        set.emit(&Event::new(EventKind::BusStopped));
        set.shutdown().await;

        assert_eq!(
            *rec.seen.lock(),
            vec![EventKind::BusStarted, EventKind::Published, EventKind::BusStopped]
        );
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_others_keep_running() {
        let stream = EventStream::new(16);
        let mut health = stream.subscribe();
        let rec = Arc::new(Recorder::default());
        let set = ObserverSet::new(vec![Arc::new(Panicker), rec.clone()], stream);

        set.emit(&Event::new(EventKind::Delivered));
        set.shutdown().await;

        let ev = health.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::ObserverPanicked);
        assert_eq!(ev.subscription.as_deref(), Some("panicker"));
        assert_eq!(ev.reason.as_deref(), Some("observer exploded"));
        assert_eq!(*rec.seen.lock(), vec![EventKind::Delivered]);
    }
}
