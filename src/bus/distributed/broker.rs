use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::{Priority, TopicPattern};
use crate::error::BrokerError;

/// Identifies one reservation of a message, for `ack`/`nack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub String);

impl Receipt {
    /// Wraps a broker-specific receipt string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Receipt as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to one consumer until it is acked, nacked, or its
/// visibility timeout passes.
#[derive(Debug, Clone)]
pub struct Reserved {
    /// Handle for `ack`/`nack`.
    pub receipt: Receipt,
    /// Encoded envelope.
    pub body: Vec<u8>,
    /// How many times this message has been reserved (1 on first delivery).
    pub deliveries: u32,
}

/// # Durable topic exchange behind [`DistributedBus`](super::DistributedBus).
///
/// Each subscription owns a named queue bound to a topic pattern. Publishing
/// copies the message into every bound queue. Consumers reserve messages for a
/// visibility period and must ack them; un-acked messages become visible again
/// (at-least-once).
///
/// ```text
/// publish(topic) ──► exchange ──► queue "sub-1.tts"  (pattern TTS.*)
///                             └─► queue "sub-2.ui"   (pattern *.Started)
/// reserve(queue) ──► Reserved ──► ack | nack(requeue_after) | visibility expiry
/// ```
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Opens a connection. Called by `DistributedBus::start`.
    ///
    /// Several buses may share one broker handle; each `connect` is paired
    /// with exactly one `close`.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Releases the connection opened by the matching `connect`.
    /// Queued messages stay on the broker.
    async fn close(&self);

    /// Creates `queue` bound to `pattern`. Idempotent.
    async fn declare(&self, queue: &str, pattern: &TopicPattern) -> Result<(), BrokerError>;

    /// Deletes `queue` and everything in it. Deleting a missing queue is not an error.
    async fn delete(&self, queue: &str) -> Result<(), BrokerError>;

    /// Copies `body` into every queue whose pattern matches `topic`.
    /// Returns the number of queues it was routed to.
    async fn publish(
        &self,
        topic: &str,
        priority: Priority,
        body: &[u8],
    ) -> Result<usize, BrokerError>;

    /// Puts `body` directly on one queue, visible after `delay`.
    async fn enqueue(
        &self,
        queue: &str,
        priority: Priority,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), BrokerError>;

    /// Takes the next visible message (lowest priority value, then oldest) and
    /// hides it for `visibility`.
    async fn reserve(
        &self,
        queue: &str,
        visibility: Duration,
    ) -> Result<Option<Reserved>, BrokerError>;

    /// Removes a reserved message for good.
    async fn ack(&self, queue: &str, receipt: &Receipt) -> Result<(), BrokerError>;

    /// Returns a reserved message to the queue, visible again after `requeue_after`.
    async fn nack(
        &self,
        queue: &str,
        receipt: &Receipt,
        requeue_after: Duration,
    ) -> Result<(), BrokerError>;

    /// Messages held by `queue`, reserved or not.
    async fn depth(&self, queue: &str) -> Result<usize, BrokerError>;
}
