//! Delivery worker: one per subscription, spawned on the bus's task tracker.
//!
//! ```text
//! loop:
//!   pop next (priority, FIFO) ──► unsubscribed?  → Dropped
//!                              ──► expired?       → Expired
//!                              ──► invoke handler (panic-isolated, cancellable)
//!                                     └─► settle → Done | Retry(timer → re-enqueue)
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::ledger::DeliveryState;
use super::queue::Push;
use super::router::Subscription;
use super::Inner;
use crate::bus::delivery::{DeliveryCore, Lifecycle, Settlement};
use crate::envelope::Envelope;

pub(crate) fn spawn(inner: &Arc<Inner>, sub: Arc<Subscription>, life: &Lifecycle) {
    life.tracker.spawn(run(Arc::clone(inner), sub, life.clone()));
}

async fn run(inner: Arc<Inner>, sub: Arc<Subscription>, life: Lifecycle) {
    loop {
        let env = tokio::select! {
            biased;
            _ = life.token.cancelled() => return,
            next = sub.queue.pop() => match next {
                Some(env) => env,
                None => return,
            },
        };
        let key = (env.id(), sub.id);

        if !sub.is_active() {
            inner.ledger.remove(key);
            inner.core.dropped(&env, sub.name(), "unsubscribed");
            continue;
        }
        if env.is_expired() {
            inner.ledger.remove(key);
            inner.core.expired(&env, sub.name());
            continue;
        }

        inner.ledger.set(key, DeliveryState::Running);
        let result = tokio::select! {
            biased;
            _ = life.token.cancelled() => {
                inner.ledger.remove(key);
                inner.core.dropped(&env, sub.name(), "bus stopped");
                return;
            }
            res = DeliveryCore::invoke(&sub.handler, Arc::clone(&env)) => res,
        };

        match inner.core.settle(env, sub.name(), result) {
            Settlement::Done => inner.ledger.remove(key),
            Settlement::Retry { envelope, delay } => {
                inner.ledger.set(key, DeliveryState::Backoff);
                schedule_retry(&inner, &sub, &life, envelope, delay);
            }
        }
    }
}

fn schedule_retry(
    inner: &Arc<Inner>,
    sub: &Arc<Subscription>,
    life: &Lifecycle,
    envelope: Envelope,
    delay: Duration,
) {
    let inner = Arc::clone(inner);
    let sub = Arc::clone(sub);
    let token = life.token.clone();

    life.tracker.spawn(async move {
        let key = (envelope.id(), sub.id);
        tokio::select! {
            _ = token.cancelled() => {
                inner.ledger.remove(key);
                inner.core.dropped(&envelope, sub.name(), "bus stopped");
            }
            _ = tokio::time::sleep(delay) => {
                if !sub.is_active() {
                    inner.ledger.remove(key);
                    inner.core.dropped(&envelope, sub.name(), "unsubscribed");
                    return;
                }
                inner.ledger.set(key, DeliveryState::Queued);
                let envelope = Arc::new(envelope);
                if sub.queue.push(Arc::clone(&envelope), false) == Push::Closed {
                    inner.ledger.remove(key);
                    inner.core.dropped(&envelope, sub.name(), "unsubscribed");
                }
            }
        }
    });
}
