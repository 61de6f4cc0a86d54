//! # In-process bus.
//!
//! ```text
//! publish(topic) ──► Router::matching(topic)
//!                      ├──► [ready queue A] ──► worker A ──► handler A
//!                      └──► [ready queue B] ──► worker B ──► handler B
//!                                                  │
//!                                 failure (Command) └──► retry timer ──► queue B
//! ```
//!
//! - Every subscription owns a bounded priority queue and a single worker, so a
//!   slow handler never delays another subscriber of the same envelope.
//! - Workers and retry timers are spawned on a [`TaskTracker`](tokio_util::task::TaskTracker)
//!   that `stop()` cancels and awaits: nothing outlives the bus.
//! - Every accepted delivery is recorded in a ledger until it settles;
//!   `stop()` drains the ledger for up to `BusConfig::grace` before cancelling.
//! - Publishing to a stopped bus fails with [`BusError::NotStarted`].

mod ledger;
mod queue;
mod router;
mod worker;

pub use ledger::{DeliveryRecord, DeliveryState};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use self::ledger::Ledger;
use self::queue::Push;
use self::router::{Router, Subscription};
use crate::bus::delivery::{DeliveryCore, Lifecycle};
use crate::bus::reply::{self, ReplySlot};
use crate::bus::{
    BusStats, DeadLetter, HandlerRef, MessageBus, PublishOptions, RequestOptions,
    SubscriptionId,
};
use crate::core::BusConfig;
use crate::envelope::{Envelope, EnvelopeId, QueryFailure, QueryResult, TopicPattern};
use crate::error::BusError;
use crate::events::EventStream;

pub(crate) struct Inner {
    core: DeliveryCore,
    router: Router,
    ledger: Ledger,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Inner {
    fn running(&self) -> Result<Lifecycle, BusError> {
        self.lifecycle.lock().clone().ok_or(BusError::NotStarted)
    }

    /// Routes an accepted envelope to every matching subscription.
    /// Returns how many subscription queues accepted it.
    fn dispatch(&self, env: Envelope) -> usize {
        self.core.published(&env);

        let subs = self.router.matching(env.topic());
        if subs.is_empty() {
            self.core.no_subscribers(&env);
            return 0;
        }

        let env = Arc::new(env);
        let mut queued = 0;
        for sub in &subs {
            let key = (env.id(), sub.id);
            self.ledger.set(key, DeliveryState::Queued);
            match sub.queue.push(Arc::clone(&env), true) {
                Push::Queued => queued += 1,
                Push::Full => {
                    self.ledger.remove(key);
                    self.core.overflow(&env, sub.name());
                }
                Push::Closed => {
                    self.ledger.remove(key);
                    self.core.dropped(&env, sub.name(), "unsubscribed");
                }
            }
        }
        queued
    }

    fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let Some(sub) = self.router.remove(id) else {
            return false;
        };
        sub.deactivate();
        for env in sub.queue.close() {
            self.ledger.remove((env.id(), id));
            self.core.dropped(&env, sub.name(), "unsubscribed");
        }
        true
    }
}

/// In-process implementation of [`MessageBus`].
///
/// Cheap to clone; clones share the same routing table and workers.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    /// Creates a stopped bus.
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: DeliveryCore::new(cfg),
                router: Router::default(),
                ledger: Ledger::default(),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// Configuration this bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.inner.core.cfg
    }

    /// Per-delivery state of everything in flight.
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.inner.ledger.snapshot()
    }

    /// Number of registered subscriptions (including pending reply subscriptions).
    pub fn subscription_count(&self) -> usize {
        self.inner.router.len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// Removes the one-shot reply subscription however `request` ends,
/// including when its future is dropped.
struct ReplyGuard {
    inner: Arc<Inner>,
    id: SubscriptionId,
}

impl Drop for ReplyGuard {
    fn drop(&mut self) {
        self.inner.remove_subscription(self.id);
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.is_some() {
            return Err(BusError::AlreadyStarted);
        }
        self.inner.core.reset_stats();

        let life = Lifecycle::new();
        for sub in self.inner.router.all() {
            worker::spawn(&self.inner, sub, &life);
        }
        *lifecycle = Some(life);
        drop(lifecycle);

        self.inner.core.started();
        Ok(())
    }

    async fn stop(&self) {
        let Some(life) = self.inner.lifecycle.lock().clone() else {
            return;
        };

        let grace = self.inner.core.cfg.grace;
        if !self.inner.ledger.wait_idle(grace).await {
            tracing::warn!(
                target: "switchboard::bus",
                in_flight = self.inner.ledger.len(),
                ?grace,
                "bus grace elapsed; cancelling remaining deliveries"
            );
        }

        life.shutdown().await;

        let mut cancelled = 0;
        for sub in self.inner.router.all() {
            for env in sub.queue.drain() {
                self.inner.core.dropped(&env, sub.name(), "bus stopped");
                cancelled += 1;
            }
        }
        self.inner.ledger.clear();

        *self.inner.lifecycle.lock() = None;
        self.inner.core.stopped(cancelled);
    }

    fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().is_some()
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: HandlerRef,
    ) -> Result<SubscriptionId, BusError> {
        let pattern = TopicPattern::parse(pattern)?;
        let sub = Arc::new(Subscription::new(
            pattern,
            handler,
            self.inner.core.cfg.queue_limit(),
        ));
        let id = sub.id;

        // Held so `start()` cannot miss or double-spawn this worker.
        let lifecycle = self.inner.lifecycle.lock();
        self.inner.router.insert(Arc::clone(&sub));
        if let Some(life) = lifecycle.as_ref() {
            worker::spawn(&self.inner, sub, life);
        }
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove_subscription(id)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        opts: PublishOptions,
    ) -> Result<EnvelopeId, BusError> {
        self.inner.running()?;
        let env = opts.build(topic, payload, &self.inner.core.cfg)?;
        let id = env.id();
        self.inner.dispatch(env);
        Ok(id)
    }

    async fn request(
        &self,
        topic: &str,
        payload: Value,
        opts: RequestOptions,
    ) -> Result<QueryResult, BusError> {
        let life = self.inner.running()?;
        let reply_to = reply::reply_topic();
        let query = opts.build(topic, payload, &reply_to, &self.inner.core.cfg)?;

        let (slot, rx) = ReplySlot::new();
        let id = self.subscribe(&reply_to, slot).await?;
        let _guard = ReplyGuard {
            inner: Arc::clone(&self.inner),
            id,
        };

        // Nobody matched, or every responder queue rejected it.
        if self.inner.dispatch(query) == 0 {
            return Ok(QueryResult::failed(QueryFailure::NoResponder));
        }

        Ok(reply::await_reply(rx, opts.timeout, &life.token).await)
    }

    fn stats(&self) -> BusStats {
        self.inner.core.stats()
    }

    fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.core.dead_letters()
    }

    fn take_dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.core.take_dead_letters()
    }

    fn in_flight(&self) -> usize {
        self.inner.ledger.len()
    }

    async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.ledger.wait_idle(timeout).await
    }

    fn events(&self) -> EventStream {
        self.inner.core.events().clone()
    }
}

#[cfg(test)]
mod tests;
