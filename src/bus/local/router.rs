use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::queue::ReadyQueue;
use crate::bus::{HandlerRef, SubscriptionId};
use crate::envelope::TopicPattern;

/// One (pattern, handler) pair with its own ready queue.
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) pattern: TopicPattern,
    pub(crate) handler: HandlerRef,
    pub(crate) queue: ReadyQueue,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(pattern: TopicPattern, handler: HandlerRef, limit: Option<usize>) -> Self {
        Self {
            id: SubscriptionId::next(),
            pattern,
            handler,
            queue: ReadyQueue::new(limit),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.handler.name()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Routing table: subscriptions by id, matched against topics on publish.
#[derive(Default)]
pub(crate) struct Router {
    subs: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
}

impl Router {
    pub(crate) fn insert(&self, sub: Arc<Subscription>) {
        self.subs.write().insert(sub.id, sub);
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subs.write().remove(&id)
    }

    /// Subscriptions whose pattern matches `topic`, in subscription order.
    pub(crate) fn matching(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let mut out: Vec<_> = self
            .subs
            .read()
            .values()
            .filter(|s| s.pattern.matches(topic))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub(crate) fn all(&self) -> Vec<Arc<Subscription>> {
        let mut out: Vec<_> = self.subs.read().values().cloned().collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.subs.read().len()
    }
}
