//! # Bus over a durable broker.
//!
//! ```text
//! publish(topic) ──► JSON ──► Broker::publish ──► queue per subscription
//!                                                   │
//!                         consumer task ◄── reserve ┘
//!                            ├─ expired / undecodable ─► ack
//!                            ├─ handler ok ────────────► ack
//!                            ├─ Command retry ─────────► enqueue(delay) + ack
//!                            └─ bus stopping ──────────► nack(0) (kept for next run)
//! ```
//!
//! Retry, dead-letter and stats decisions are the same code the local bus runs.
//! A message is acked only after its handler settled, so a crash in between
//! redelivers it once the visibility timeout passes: handlers must be idempotent.

mod broker;
mod memory;

pub use broker::{Broker, Receipt, Reserved};
pub use memory::MemoryBroker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::bus::delivery::{DeliveryCore, Lifecycle, Settlement};
use crate::bus::reply::{self, ReplySlot};
use crate::bus::{
    BusStats, DeadLetter, HandlerRef, MessageBus, PublishOptions, RequestOptions,
    SubscriptionId,
};
use crate::core::BusConfig;
use crate::envelope::{Envelope, EnvelopeId, QueryFailure, QueryResult, TopicPattern};
use crate::error::{BrokerError, BusError};
use crate::events::EventStream;

const TARGET: &str = "switchboard::bus";

struct Consumer {
    id: SubscriptionId,
    queue: String,
    pattern: TopicPattern,
    handler: HandlerRef,
    active: AtomicBool,
}

impl Consumer {
    fn new(pattern: TopicPattern, handler: HandlerRef) -> Self {
        let id = SubscriptionId::next();
        let queue = if pattern.as_str().starts_with("_reply.") {
            pattern.as_str().to_string()
        } else {
            format!("{id}.{}", handler.name())
        };
        Self {
            id,
            queue,
            pattern,
            handler,
            active: AtomicBool::new(true),
        }
    }

    fn name(&self) -> &str {
        self.handler.name()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Counts a handler invocation as in flight for as long as it lives.
struct Busy<'a>(&'a AtomicUsize);

impl<'a> Busy<'a> {
    fn enter(n: &'a AtomicUsize) -> Self {
        n.fetch_add(1, Ordering::AcqRel);
        Self(n)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Inner<B> {
    broker: B,
    core: DeliveryCore,
    consumers: RwLock<HashMap<SubscriptionId, Arc<Consumer>>>,
    // Held across broker calls in start/subscribe, so it is an async lock.
    lifecycle: Mutex<Option<Lifecycle>>,
    running: AtomicBool,
    busy: AtomicUsize,
}

impl<B: Broker> Inner<B> {
    fn spawn(self: &Arc<Self>, consumer: Arc<Consumer>, life: &Lifecycle) {
        life.tracker
            .spawn(Arc::clone(self).consume(consumer, life.clone()));
    }

    async fn consume(self: Arc<Self>, c: Arc<Consumer>, life: Lifecycle) {
        let poll = self.core.cfg.poll_interval;
        let visibility = self.core.cfg.visibility_timeout;

        while c.is_active() {
            let reserved = tokio::select! {
                biased;
                _ = life.token.cancelled() => return,
                r = self.broker.reserve(&c.queue, visibility) => r,
            };

            let msg = match reserved {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    if idle(&life, poll).await {
                        return;
                    }
                    continue;
                }
                Err(BrokerError::QueueNotFound(_)) => {
                    if !c.is_active() {
                        return;
                    }
                    if let Err(err) = self.broker.declare(&c.queue, &c.pattern).await {
                        tracing::warn!(target: TARGET, queue = %c.queue, error = %err, "re-declare failed");
                    }
                    if idle(&life, poll).await {
                        return;
                    }
                    continue;
                }
                Err(err) => {
                    tracing::warn!(target: TARGET, queue = %c.queue, error = %err, "reserve failed");
                    if idle(&life, poll).await {
                        return;
                    }
                    continue;
                }
            };

            let _busy = Busy::enter(&self.busy);
            if !self.deliver(&c, msg, &life).await {
                return;
            }
        }
    }

    /// Handles one reserved message. Returns `false` when the bus is stopping.
    async fn deliver(&self, c: &Consumer, msg: Reserved, life: &Lifecycle) -> bool {
        let env: Envelope = match serde_json::from_slice(&msg.body) {
            Ok(env) => env,
            Err(err) => {
                tracing::warn!(
                    target: TARGET,
                    queue = %c.queue,
                    receipt = %msg.receipt,
                    error = %err,
                    "discarding undecodable message"
                );
                self.ack(c, &msg.receipt).await;
                return true;
            }
        };

        if msg.deliveries > 1 {
            tracing::debug!(
                target: TARGET,
                envelope_id = %env.id(),
                subscription = c.name(),
                deliveries = msg.deliveries,
                "redelivery after visibility timeout"
            );
        }

        if env.is_expired() {
            self.core.expired(&env, c.name());
            self.ack(c, &msg.receipt).await;
            return true;
        }

        let env = Arc::new(env);
        let result = tokio::select! {
            biased;
            _ = life.token.cancelled() => {
                if let Err(err) = self.broker.nack(&c.queue, &msg.receipt, Duration::ZERO).await {
                    tracing::debug!(target: TARGET, queue = %c.queue, error = %err, "nack on stop failed");
                }
                return false;
            }
            res = DeliveryCore::invoke(&c.handler, Arc::clone(&env)) => res,
        };

        if let Settlement::Retry { envelope, delay } = self.core.settle(env, c.name(), result) {
            if let Err(err) = self.requeue(c, &envelope, delay).await {
                // Left un-acked: the broker redelivers it after the visibility timeout.
                tracing::warn!(
                    target: TARGET,
                    envelope_id = %envelope.id(),
                    subscription = c.name(),
                    error = %err,
                    "retry enqueue failed"
                );
                return true;
            }
        }
        self.ack(c, &msg.receipt).await;
        true
    }

    async fn requeue(
        &self,
        c: &Consumer,
        envelope: &Envelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let body = encode(envelope)?;
        self.broker
            .enqueue(&c.queue, envelope.priority(), &body, delay)
            .await
    }

    async fn ack(&self, c: &Consumer, receipt: &Receipt) {
        if let Err(err) = self.broker.ack(&c.queue, receipt).await {
            tracing::debug!(target: TARGET, queue = %c.queue, error = %err, "ack failed");
        }
    }

    fn remove_consumer(&self, id: SubscriptionId) -> Option<Arc<Consumer>> {
        let c = self.consumers.write().remove(&id)?;
        c.active.store(false, Ordering::Release);
        Some(c)
    }

    async fn depth(&self) -> usize {
        let queues: Vec<String> = self
            .consumers
            .read()
            .values()
            .map(|c| c.queue.clone())
            .collect();
        let mut total = 0;
        for q in queues {
            total += self.broker.depth(&q).await.unwrap_or(0);
        }
        total
    }
}

/// Sleeps for one poll interval. Returns `true` if the bus stopped meanwhile.
async fn idle(life: &Lifecycle, poll: Duration) -> bool {
    tokio::select! {
        _ = life.token.cancelled() => true,
        _ = tokio::time::sleep(poll) => false,
    }
}

fn encode(env: &Envelope) -> Result<Vec<u8>, BrokerError> {
    serde_json::to_vec(env).map_err(|e| BrokerError::Serialisation(e.to_string()))
}

/// Deletes a request's reply queue however the request ends.
struct ReplyGuard<B: Broker> {
    inner: Arc<Inner<B>>,
    id: SubscriptionId,
}

impl<B: Broker> Drop for ReplyGuard<B> {
    fn drop(&mut self) {
        let Some(c) = self.inner.remove_consumer(self.id) else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move {
                let _ = inner.broker.delete(&c.queue).await;
            });
        }
    }
}

/// [`MessageBus`] over any [`Broker`].
///
/// Each subscription gets its own broker queue named `sub-<id>.<handler name>`
/// and one consumer task. Queues outlive `stop()`, so Commands published while
/// a consumer is stopped are delivered after the next `start()`.
pub struct DistributedBus<B: Broker> {
    inner: Arc<Inner<B>>,
}

impl<B: Broker> Clone for DistributedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broker> DistributedBus<B> {
    /// Creates a stopped bus over `broker`.
    pub fn new(broker: B, cfg: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                core: DeliveryCore::new(cfg),
                consumers: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(None),
                running: AtomicBool::new(false),
                busy: AtomicUsize::new(0),
            }),
        }
    }

    /// The broker this bus talks to.
    pub fn broker(&self) -> &B {
        &self.inner.broker
    }

    /// Configuration this bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.inner.core.cfg
    }

    async fn lifecycle(&self) -> Result<Lifecycle, BusError> {
        self.inner
            .lifecycle
            .lock()
            .await
            .clone()
            .ok_or(BusError::NotStarted)
    }

    async fn add_consumer(&self, consumer: Consumer) -> Result<Arc<Consumer>, BusError> {
        let c = Arc::new(consumer);
        let lifecycle = self.inner.lifecycle.lock().await;
        if let Some(life) = lifecycle.as_ref() {
            self.inner.broker.declare(&c.queue, &c.pattern).await?;
            self.inner.spawn(Arc::clone(&c), life);
        }
        self.inner.consumers.write().insert(c.id, Arc::clone(&c));
        Ok(c)
    }
}

#[async_trait]
impl<B: Broker> MessageBus for DistributedBus<B> {
    async fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(BusError::AlreadyStarted);
        }
        self.inner.broker.connect().await?;

        let consumers: Vec<_> = self.inner.consumers.read().values().cloned().collect();
        for c in &consumers {
            if let Err(err) = self.inner.broker.declare(&c.queue, &c.pattern).await {
                self.inner.broker.close().await;
                return Err(err.into());
            }
        }

        self.inner.core.reset_stats();
        let life = Lifecycle::new();
        for c in consumers {
            self.inner.spawn(c, &life);
        }
        *lifecycle = Some(life);
        self.inner.running.store(true, Ordering::Release);
        drop(lifecycle);

        self.inner.core.started();
        Ok(())
    }

    async fn stop(&self) {
        let Some(life) = self.inner.lifecycle.lock().await.clone() else {
            return;
        };

        let grace = self.inner.core.cfg.grace;
        if !self.wait_idle(grace).await {
            tracing::warn!(
                target: TARGET,
                in_flight = self.in_flight(),
                ?grace,
                "bus grace elapsed; remaining messages stay on the broker"
            );
        }

        let cancelled = self.in_flight();
        life.shutdown().await;
        self.inner.running.store(false, Ordering::Release);
        self.inner.broker.close().await;

        *self.inner.lifecycle.lock().await = None;
        self.inner.core.stopped(cancelled);
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: HandlerRef,
    ) -> Result<SubscriptionId, BusError> {
        let pattern = TopicPattern::parse(pattern)?;
        let c = self.add_consumer(Consumer::new(pattern, handler)).await?;
        Ok(c.id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(c) = self.inner.remove_consumer(id) else {
            return false;
        };
        if let Err(err) = self.inner.broker.delete(&c.queue).await {
            tracing::warn!(target: TARGET, queue = %c.queue, error = %err, "queue delete failed");
        }
        true
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        opts: PublishOptions,
    ) -> Result<EnvelopeId, BusError> {
        if !self.is_running() {
            return Err(BusError::NotStarted);
        }
        let env = opts.build(topic, payload, &self.inner.core.cfg)?;
        let body = encode(&env)?;
        let routed = self
            .inner
            .broker
            .publish(env.topic(), env.priority(), &body)
            .await?;

        self.inner.core.published(&env);
        if routed == 0 {
            self.inner.core.no_subscribers(&env);
        }
        Ok(env.id())
    }

    async fn request(
        &self,
        topic: &str,
        payload: Value,
        opts: RequestOptions,
    ) -> Result<QueryResult, BusError> {
        let life = self.lifecycle().await?;
        let reply_to = reply::reply_topic();
        let query = opts.build(topic, payload, &reply_to, &self.inner.core.cfg)?;

        let (slot, rx) = ReplySlot::new();
        let pattern = TopicPattern::parse(&reply_to)?;
        let c = self.add_consumer(Consumer::new(pattern, slot)).await?;
        let _guard = ReplyGuard {
            inner: Arc::clone(&self.inner),
            id: c.id,
        };

        let body = encode(&query)?;
        let routed = self
            .inner
            .broker
            .publish(query.topic(), query.priority(), &body)
            .await?;
        self.inner.core.published(&query);
        if routed == 0 {
            self.inner.core.no_subscribers(&query);
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

    /// Handler invocations running right now; queued messages live on the broker.
    fn in_flight(&self) -> usize {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Waits until no handler runs and every subscription queue is empty.
    async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let poll = self.inner.core.cfg.poll_interval;
        loop {
            if self.in_flight() == 0 && self.inner.depth().await == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn events(&self) -> EventStream {
        self.inner.core.events().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HandlerFn;
    use crate::envelope::Priority;
    use crate::error::HandlerError;
    use crate::policies::BackoffPolicy;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn config() -> BusConfig {
        BusConfig {
            retry: BackoffPolicy::constant(Duration::from_millis(5)),
            grace: Duration::from_secs(1),
            poll_interval: Duration::from_millis(2),
            ..BusConfig::default()
        }
    }

    async fn started(broker: MemoryBroker) -> DistributedBus<MemoryBroker> {
        let bus = DistributedBus::new(broker, config());
        bus.start().await.unwrap();
        bus
    }

    fn recorder(seen: Arc<parking_lot::Mutex<Vec<i64>>>) -> HandlerRef {
        HandlerFn::arc("recorder", move |env: Arc<Envelope>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(env.payload()["n"].as_i64().unwrap_or(-1));
                Ok::<_, HandlerError>(())
            }
        })
    }

    #[tokio::test]
    async fn test_delivers_events_to_every_matching_queue() {
        let bus = started(MemoryBroker::new()).await;
        let a = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let b = Arc::new(parking_lot::Mutex::new(Vec::new()));
        bus.subscribe("TTS.*", recorder(Arc::clone(&a))).await.unwrap();
        bus.subscribe("TTS.Started", recorder(Arc::clone(&b))).await.unwrap();

        bus.publish("TTS.Started", json!({"n": 1}), PublishOptions::event())
            .await
            .unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);

        assert_eq!(*a.lock(), vec![1]);
        assert_eq!(*b.lock(), vec![1]);
        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 2);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_commands_are_retried_then_dead_lettered() {
        let bus = started(MemoryBroker::new()).await;
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        bus.subscribe(
            "DB.Write",
            HandlerFn::arc("db", move |_env: Arc<Envelope>| {
                let calls = Arc::clone(&counted);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(HandlerError::fail("disk busy"))
                }
            }),
        )
        .await
        .unwrap();

        bus.publish("DB.Write", json!({}), PublishOptions::command())
            .await
            .unwrap();
        assert!(bus.wait_idle(Duration::from_secs(2)).await);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.attempts(), 3);
        assert_eq!(bus.stats().retried, 2);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_request_round_trip_and_fast_fail() {
        let bus = started(MemoryBroker::new()).await;

        let none = bus
            .request("DB.Get", json!({}), RequestOptions::new(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(none.error, Some(QueryFailure::NoResponder));

        let responder = bus.clone();
        bus.subscribe(
            "DB.Get",
            HandlerFn::arc("db", move |env: Arc<Envelope>| {
                let bus = responder.clone();
                async move {
                    bus.reply(&env, json!({"rows": 2}))
                        .await
                        .map_err(|e| HandlerError::fail(e.to_string()))?;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

        let res = bus
            .request("DB.Get", json!({}), RequestOptions::new(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(res.into_result().unwrap(), json!({"rows": 2}));

        // Reply queues are removed once the request resolves.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bus
            .broker()
            .queues()
            .iter()
            .all(|q| !q.starts_with("_reply.")));
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_queued_commands_survive_a_restart() {
        let broker = MemoryBroker::new();
        let bus = started(broker.clone()).await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        bus.subscribe("STT.Transcribe", recorder(Arc::clone(&seen)))
            .await
            .unwrap();
        bus.stop().await;

        // Another process publishes while this one is down.
        let producer = started(broker.clone()).await;
        producer
            .publish("STT.Transcribe", json!({"n": 7}), PublishOptions::command())
            .await
            .unwrap();
        producer.stop().await;
        assert!(seen.lock().is_empty());

        bus.start().await.unwrap();
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock(), vec![7]);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_stopping_one_bus_keeps_peers_on_the_same_broker_connected() {
        let broker = MemoryBroker::new();
        let a = started(broker.clone()).await;
        let b = started(broker.clone()).await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        b.subscribe("TTS.Request", recorder(Arc::clone(&seen)))
            .await
            .unwrap();

        a.stop().await;
        b.publish("TTS.Request", json!({"n": 3}), PublishOptions::command())
            .await
            .unwrap();
        assert!(b.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(*seen.lock(), vec![3]);
        b.stop().await;

        let err = broker
            .publish("TTS.Request", Priority::new(10).unwrap(), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Connection(_)));
    }

    #[tokio::test]
    async fn test_undecodable_messages_are_discarded() {
        let broker = MemoryBroker::new();
        let bus = started(broker.clone()).await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        bus.subscribe("UI.Show", recorder(Arc::clone(&seen)))
            .await
            .unwrap();

        let routed = broker
            .publish("UI.Show", Priority::new(10).unwrap(), b"not json")
            .await
            .unwrap();
        assert_eq!(routed, 1);
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        assert!(seen.lock().is_empty());
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_publish_requires_a_started_bus() {
        let bus = DistributedBus::new(MemoryBroker::new(), config());
        let err = bus
            .publish("A.B", json!(null), PublishOptions::event())
            .await
            .unwrap_err();
        assert_eq!(err, BusError::NotStarted);
        bus.start().await.unwrap();
        assert_eq!(bus.start().await.unwrap_err(), BusError::AlreadyStarted);
        bus.stop().await;
        assert!(!bus.is_running());
    }
}
