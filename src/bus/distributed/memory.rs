use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::broker::{Broker, Receipt, Reserved};
use crate::envelope::{Priority, TopicPattern};
use crate::error::BrokerError;

#[derive(Debug, Clone)]
struct QueueEntry {
    receipt: Receipt,
    priority: u8,
    seq: u64,
    body: Vec<u8>,
    visible_at: Instant,
    deliveries: u32,
}

#[derive(Debug)]
struct BoundQueue {
    pattern: TopicPattern,
    entries: Vec<QueueEntry>,
}

#[derive(Debug, Default)]
struct State {
    // One per `connect` not yet matched by a `close`.
    connections: usize,
    seq: u64,
    queues: HashMap<String, BoundQueue>,
}

impl State {
    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connections > 0 {
            Ok(())
        } else {
            Err(BrokerError::Connection("broker is not connected".into()))
        }
    }

    fn entry(&mut self, priority: Priority, body: &[u8], delay: Duration) -> QueueEntry {
        self.seq += 1;
        QueueEntry {
            receipt: Receipt::new(Uuid::new_v4().to_string()),
            priority: priority.get(),
            seq: self.seq,
            body: body.to_vec(),
            visible_at: Instant::now() + delay,
            deliveries: 0,
        }
    }
}

/// In-process [`Broker`] with priority ordering and visibility timeouts.
///
/// Clones share the same queues, so several `DistributedBus` instances built
/// on clones behave like processes attached to one broker. Each `connect` is
/// matched by one `close`; the broker stays usable while any client is
/// connected. Messages survive a bus `stop()`/`start()` cycle, but not the
/// process.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Creates an empty, disconnected broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the declared queues.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.state.lock().connections += 1;
        Ok(())
    }

    async fn close(&self) {
        let mut st = self.state.lock();
        st.connections = st.connections.saturating_sub(1);
    }

    async fn declare(&self, queue: &str, pattern: &TopicPattern) -> Result<(), BrokerError> {
        let mut st = self.state.lock();
        st.ensure_connected()?;
        st.queues
            .entry(queue.to_string())
            .and_modify(|q| q.pattern = pattern.clone())
            .or_insert_with(|| BoundQueue {
                pattern: pattern.clone(),
                entries: Vec::new(),
            });
        Ok(())
    }

    async fn delete(&self, queue: &str) -> Result<(), BrokerError> {
        self.state.lock().queues.remove(queue);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        priority: Priority,
        body: &[u8],
    ) -> Result<usize, BrokerError> {
        let mut st = self.state.lock();
        st.ensure_connected()?;

        let targets: Vec<String> = st
            .queues
            .iter()
            .filter(|(_, q)| q.pattern.matches(topic))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &targets {
            let entry = st.entry(priority, body, Duration::ZERO);
            if let Some(q) = st.queues.get_mut(name) {
                q.entries.push(entry);
            }
        }
        Ok(targets.len())
    }

    async fn enqueue(
        &self,
        queue: &str,
        priority: Priority,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let mut st = self.state.lock();
        st.ensure_connected()?;
        let entry = st.entry(priority, body, delay);
        st.queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?
            .entries
            .push(entry);
        Ok(())
    }

    async fn reserve(
        &self,
        queue: &str,
        visibility: Duration,
    ) -> Result<Option<Reserved>, BrokerError> {
        let mut st = self.state.lock();
        st.ensure_connected()?;
        let q = st
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        let next = q
            .entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| (e.priority, e.seq));

        Ok(next.map(|entry| {
            entry.visible_at = now + visibility;
            entry.deliveries += 1;
            Reserved {
                receipt: entry.receipt.clone(),
                body: entry.body.clone(),
                deliveries: entry.deliveries,
            }
        }))
    }

    async fn ack(&self, queue: &str, receipt: &Receipt) -> Result<(), BrokerError> {
        let mut st = self.state.lock();
        let q = st
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        let before = q.entries.len();
        q.entries.retain(|e| e.receipt != *receipt);
        if q.entries.len() == before {
            return Err(BrokerError::Backend(format!("unknown receipt {receipt}")));
        }
        Ok(())
    }

    async fn nack(
        &self,
        queue: &str,
        receipt: &Receipt,
        requeue_after: Duration,
    ) -> Result<(), BrokerError> {
        let mut st = self.state.lock();
        let q = st
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        match q.entries.iter_mut().find(|e| e.receipt == *receipt) {
            Some(entry) => {
                entry.visible_at = Instant::now() + requeue_after;
                Ok(())
            }
            None => Err(BrokerError::Backend(format!("unknown receipt {receipt}"))),
        }
    }

    async fn depth(&self, queue: &str) -> Result<usize, BrokerError> {
        let st = self.state.lock();
        st.queues
            .get(queue)
            .map(|q| q.entries.len())
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> TopicPattern {
        TopicPattern::parse(s).unwrap()
    }

    fn prio(p: u8) -> Priority {
        Priority::new(p).unwrap()
    }

    async fn connected() -> MemoryBroker {
        let b = MemoryBroker::new();
        b.connect().await.unwrap();
        b
    }

    #[tokio::test]
    async fn test_publish_routes_to_bound_queues() {
        let b = connected().await;
        b.declare("tts", &pattern("TTS.*")).await.unwrap();
        b.declare("ui", &pattern("*.Started")).await.unwrap();

        assert_eq!(b.publish("TTS.Started", prio(10), b"x").await.unwrap(), 2);
        assert_eq!(b.publish("TTS.Request", prio(10), b"y").await.unwrap(), 1);
        assert_eq!(b.publish("DB.Get", prio(10), b"z").await.unwrap(), 0);
        assert_eq!(b.depth("tts").await.unwrap(), 2);
        assert_eq!(b.depth("ui").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reserve_prefers_lower_priority_then_age() {
        let b = connected().await;
        b.declare("q", &pattern("A.B")).await.unwrap();
        b.publish("A.B", prio(50), b"late-low").await.unwrap();
        b.publish("A.B", prio(10), b"first-high").await.unwrap();
        b.publish("A.B", prio(10), b"second-high").await.unwrap();

        let mut order = Vec::new();
        while let Some(m) = b.reserve("q", Duration::from_secs(30)).await.unwrap() {
            order.push(String::from_utf8(m.body.clone()).unwrap());
            b.ack("q", &m.receipt).await.unwrap();
        }
        assert_eq!(order, vec!["first-high", "second-high", "late-low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_messages_are_redelivered_after_visibility() {
        let b = connected().await;
        b.declare("q", &pattern("A.B")).await.unwrap();
        b.publish("A.B", prio(10), b"m").await.unwrap();

        let first = b.reserve("q", Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(first.deliveries, 1);
        assert!(b.reserve("q", Duration::from_secs(5)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        let again = b.reserve("q", Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(again.deliveries, 2);
        assert_eq!(again.receipt, first.receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_and_enqueue_respect_delay() {
        let b = connected().await;
        b.declare("q", &pattern("A.B")).await.unwrap();
        b.enqueue("q", prio(10), b"later", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(b.reserve("q", Duration::from_secs(5)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let m = b.reserve("q", Duration::from_secs(5)).await.unwrap().unwrap();
        b.nack("q", &m.receipt, Duration::from_secs(1)).await.unwrap();
        assert!(b.reserve("q", Duration::from_secs(5)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(b.reserve("q", Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_closed_broker_refuses_work() {
        let b = connected().await;
        b.declare("q", &pattern("A.B")).await.unwrap();
        b.close().await;
        let err = b.publish("A.B", prio(10), b"m").await.unwrap_err();
        assert_eq!(err.as_label(), "broker_connection");
        assert!(matches!(
            b.reserve("missing", Duration::from_secs(1)).await,
            Err(BrokerError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_clone_stays_connected_until_last_close() {
        let a = connected().await;
        let b = a.clone();
        b.connect().await.unwrap();
        a.declare("q", &pattern("A.B")).await.unwrap();

        a.close().await;
        assert_eq!(b.publish("A.B", prio(10), b"m").await.unwrap(), 1);

        b.close().await;
        assert!(matches!(
            b.publish("A.B", prio(10), b"m").await,
            Err(BrokerError::Connection(_))
        ));
    }
}
