//! # Delivery decisions shared by every transport.
//!
//! A transport moves envelopes; this module decides what a handler's result
//! means and keeps the books (stats, dead letters, observability events).
//!
//! ```text
//! invoke(handler, env) ── Ok ─────────────────────────────► Delivered
//!        │
//!        └─ Err / panic ─► HandlerFailed
//!                 ├─ Event / Query ───────────────────────► done (reported only)
//!                 └─ Command: attempts += 1
//!                        ├─ Fatal ────────────────────────► DeadLettered
//!                        ├─ attempts == max_attempts ─────► DeadLettered
//!                        └─ otherwise ────────────────────► RetryScheduled(delay_for(attempts))
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::dead_letter::{DeadLetter, DeadLetterStore};
use super::handler::HandlerRef;
use super::stats::{BusStats, Counter, Counters};
use crate::core::BusConfig;
use crate::envelope::{Envelope, MessageKind};
use crate::error::{panic_info, HandlerError};
use crate::events::{Event, EventKind, EventStream};

/// Reason recorded when a subscription queue rejects a Command or Query.
pub(crate) const QUEUE_FULL: &str = "queue_full";

/// Cancellation scope of one `start()..stop()` run of a bus.
///
/// Workers, consumers and retry timers are spawned on `tracker`, so `stop()`
/// can cancel and await all of them.
#[derive(Clone)]
pub(crate) struct Lifecycle {
    pub(crate) token: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Cancels every task of this run and waits for them to exit.
    pub(crate) async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// What the transport must do after a handler returned.
#[derive(Debug)]
pub(crate) enum Settlement {
    /// Nothing more to do for this (envelope, subscription).
    Done,
    /// Redeliver this updated envelope to the same subscription after `delay`.
    Retry { envelope: Envelope, delay: Duration },
}

/// Books and decisions common to the local and distributed buses.
pub(crate) struct DeliveryCore {
    pub(crate) cfg: BusConfig,
    stats: Counters,
    dead: DeadLetterStore,
    events: EventStream,
}

impl DeliveryCore {
    pub(crate) fn new(cfg: BusConfig) -> Self {
        let events = EventStream::new(cfg.event_capacity_clamped());
        Self {
            cfg,
            stats: Counters::default(),
            dead: DeadLetterStore::default(),
            events,
        }
    }

    pub(crate) fn events(&self) -> &EventStream {
        &self.events
    }

    pub(crate) fn stats(&self) -> BusStats {
        self.stats.snapshot()
    }

    pub(crate) fn reset_stats(&self) {
        self.stats.reset();
    }

    pub(crate) fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.snapshot()
    }

    pub(crate) fn take_dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.take()
    }

    pub(crate) fn started(&self) {
        self.events.publish(Event::new(EventKind::BusStarted));
    }

    pub(crate) fn stopped(&self, cancelled: usize) {
        let mut ev = Event::new(EventKind::BusStopped);
        if cancelled > 0 {
            ev = ev.with_reason(format!("{cancelled} deliveries cancelled"));
        }
        self.events.publish(ev);
    }

    pub(crate) fn published(&self, env: &Envelope) {
        self.stats.incr(Counter::Published);
        self.events
            .publish(Event::for_envelope(EventKind::Published, env));
    }

    pub(crate) fn no_subscribers(&self, env: &Envelope) {
        self.events
            .publish(Event::for_envelope(EventKind::NoSubscribers, env));
    }

    pub(crate) fn expired(&self, env: &Envelope, handler: &str) {
        self.stats.incr(Counter::Expired);
        self.events.publish(
            Event::for_envelope(EventKind::Expired, env).with_subscription(handler),
        );
    }

    pub(crate) fn dropped(&self, env: &Envelope, handler: &str, reason: &str) {
        self.stats.incr(Counter::Dropped);
        self.events.publish(
            Event::for_envelope(EventKind::Dropped, env)
                .with_subscription(handler)
                .with_reason(reason),
        );
    }

    /// A subscription queue was full: Events are dropped, anything that
    /// somebody waits on (Commands, Queries) is dead-lettered.
    pub(crate) fn overflow(&self, env: &Envelope, handler: &str) {
        match env.kind() {
            MessageKind::Event => self.dropped(env, handler, QUEUE_FULL),
            MessageKind::Command | MessageKind::Query => {
                self.dead_letter(env.clone(), handler, QUEUE_FULL.to_string())
            }
        }
    }

    pub(crate) fn dead_letter(&self, env: Envelope, handler: &str, reason: String) {
        self.stats.incr(Counter::DeadLettered);
        self.events.publish(
            Event::for_envelope(EventKind::DeadLettered, &env)
                .with_subscription(handler)
                .with_reason(reason.as_str()),
        );
        self.dead.push(env, handler, reason);
    }

    /// Runs one handler invocation, turning a panic into [`HandlerError::Panicked`].
    pub(crate) async fn invoke(
        handler: &HandlerRef,
        env: Arc<Envelope>,
    ) -> Result<(), HandlerError> {
        match AssertUnwindSafe(handler.handle(env)).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => Err(HandlerError::Panicked {
                info: panic_info(payload.as_ref()),
            }),
        }
    }

    /// Classifies a handler result and records it.
    pub(crate) fn settle(
        &self,
        env: Arc<Envelope>,
        handler: &str,
        result: Result<(), HandlerError>,
    ) -> Settlement {
        let err = match result {
            Ok(()) => {
                self.stats.incr(Counter::Delivered);
                self.events.publish(
                    Event::for_envelope(EventKind::Delivered, &env).with_subscription(handler),
                );
                return Settlement::Done;
            }
            Err(err) => err,
        };

        self.stats.incr(Counter::Failed);
        let reason = err.to_string();
        self.events.publish(
            Event::for_envelope(EventKind::HandlerFailed, &env)
                .with_subscription(handler)
                .with_reason(reason.as_str()),
        );

        if env.kind() != MessageKind::Command {
            return Settlement::Done;
        }

        // Each subscription owns its copy of a Command's retry state.
        let mut env = Arc::try_unwrap(env).unwrap_or_else(|shared| (*shared).clone());
        let attempts = env.record_failure();

        if !err.is_retryable() {
            env.exhaust();
            self.dead_letter(env, handler, reason);
            return Settlement::Done;
        }
        if attempts >= env.max_attempts() {
            self.dead_letter(env, handler, reason);
            return Settlement::Done;
        }

        let delay = self.cfg.retry.delay_for(attempts);
        self.stats.incr(Counter::Retried);
        self.events.publish(
            Event::for_envelope(EventKind::RetryScheduled, &env)
                .with_subscription(handler)
                .with_delay(delay)
                .with_reason(reason),
        );
        Settlement::Retry {
            envelope: env,
            delay,
        }
    }
}
