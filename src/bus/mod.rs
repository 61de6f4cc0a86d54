//! # The message bus contract and its transports.
//!
//! Services talk to each other only through a [`MessageBus`]. Two transports
//! implement the same contract, so services never know which one they run on:
//!
//! - [`LocalBus`]: in-process, memory-only, one delivery worker per subscription.
//! - [`DistributedBus`]: the same semantics over a durable [`Broker`],
//!   at-least-once (handlers must be idempotent).
//!
//! ## Delivery contract
//! ```text
//! publish(Event)    → every matching subscription, no retry
//! publish(Command)  → every matching subscription, retried with backoff,
//!                     dead-lettered after max_attempts; no subscriber = silent no-op
//! request(Query)    → one reply on a private reply topic, or timeout;
//!                     no subscriber = immediate "no responder"
//! ```
//!
//! Within one subscription, envelopes are handed out by priority (lower
//! first), then in publish order. Different subscriptions never wait on each
//! other. Handler errors never reach the publisher: they show up in
//! [`MessageBus::stats`], [`MessageBus::dead_letters`] and on the
//! [`EventStream`] returned by [`MessageBus::events`].

mod dead_letter;
pub(crate) mod delivery;
mod handler;
mod options;
mod reply;
mod stats;

pub mod distributed;
pub mod local;

pub use dead_letter::DeadLetter;
pub use distributed::{Broker, DistributedBus, MemoryBroker, Receipt, Reserved};
pub use handler::{Handler, HandlerFn, HandlerRef, SubscriptionId};
pub use local::LocalBus;
pub use options::{PublishOptions, RequestOptions};
pub use stats::BusStats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::{Envelope, EnvelopeId, QueryResult};
use crate::error::{BusError, MessageError};
use crate::events::EventStream;

/// Shared handle to the active bus.
pub type BusRef = Arc<dyn MessageBus>;

/// # Transport-agnostic publish/subscribe/request contract.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde_json::json;
/// use switchboard::{
///     BusConfig, BusRef, Envelope, HandlerError, HandlerFn, LocalBus, MessageBus,
///     PublishOptions, RequestOptions,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bus: BusRef = Arc::new(LocalBus::new(BusConfig::default()));
///     bus.start().await?;
///
///     let responder = Arc::clone(&bus);
///     bus.subscribe("DB.GetMessages", HandlerFn::arc("db", move |q: Arc<Envelope>| {
///         let bus = Arc::clone(&responder);
///         async move {
///             bus.reply(&q, json!(["hello"])).await.map_err(|e| HandlerError::fail(e.to_string()))?;
///             Ok::<_, HandlerError>(())
///         }
///     })).await?;
///
///     let res = bus
///         .request("DB.GetMessages", json!({}), RequestOptions::new(Duration::from_secs(1)))
///         .await?;
///     assert!(res.ok);
///     assert_eq!(res.data, Some(json!(["hello"])));
///
///     bus.publish("TTS.Started", json!(null), PublishOptions::event()).await?;
///     bus.stop().await;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Starts delivery. Fails with [`BusError::AlreadyStarted`] if running.
    async fn start(&self) -> Result<(), BusError>;

    /// Drains in-flight deliveries for up to the configured grace, then cancels
    /// the rest. Idempotent.
    async fn stop(&self);

    /// Returns `true` between `start` and `stop`.
    fn is_running(&self) -> bool;

    /// Registers `handler` on a topic pattern (see [`TopicPattern`](crate::TopicPattern)).
    ///
    /// Allowed before `start`; delivery begins once the bus runs.
    async fn subscribe(&self, pattern: &str, handler: HandlerRef)
        -> Result<SubscriptionId, BusError>;

    /// Removes a subscription. Returns `false` if it was already gone.
    ///
    /// Envelopes still queued for it are dropped; at most the one invocation
    /// already in progress completes after this returns.
    async fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Publishes an Event or Command and returns once it is scheduled.
    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        opts: PublishOptions,
    ) -> Result<EnvelopeId, BusError>;

    /// Sends a Query and waits for one reply, the timeout, or bus shutdown.
    ///
    /// Expected failures are returned as a failed [`QueryResult`], not an error.
    async fn request(
        &self,
        topic: &str,
        payload: Value,
        opts: RequestOptions,
    ) -> Result<QueryResult, BusError>;

    /// Answers a Query: publishes `data` as an Event on its `reply_to` topic,
    /// carrying the query's correlation id and priority.
    async fn reply(&self, query: &Envelope, data: Value) -> Result<EnvelopeId, BusError> {
        let reply_to = query
            .reply_to()
            .ok_or_else(|| MessageError::invalid("envelope has no reply_to topic"))?;
        let mut opts = PublishOptions::event().with_priority(query.priority().get());
        if let Some(id) = query.correlation_id() {
            opts = opts.with_correlation_id(id);
        }
        self.publish(reply_to, data, opts).await
    }

    /// Counters since the last `start`.
    fn stats(&self) -> BusStats;

    /// Snapshot of the dead-letter set.
    fn dead_letters(&self) -> Vec<DeadLetter>;

    /// Removes and returns the dead-letter set.
    fn take_dead_letters(&self) -> Vec<DeadLetter>;

    /// Deliveries accepted but not yet settled.
    fn in_flight(&self) -> usize;

    /// Waits until nothing is in flight. Returns `false` on timeout.
    async fn wait_idle(&self, timeout: Duration) -> bool;

    /// Observability stream of delivery outcomes.
    fn events(&self) -> EventStream;
}
