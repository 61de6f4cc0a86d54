//! Delivery ledger: one record per (envelope, subscription) not yet settled.
//!
//! ```text
//! publish ──► Queued ──► Running ──┬──► (removed)          delivered / dead / dropped
//!                ▲                 └──► Backoff ──timer──► Queued
//!                └──────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::bus::SubscriptionId;
use crate::envelope::EnvelopeId;

/// Where one delivery currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting in the subscription's ready queue.
    Queued,
    /// The handler is running.
    Running,
    /// A failed Command waiting for its retry timer.
    Backoff,
}

/// Snapshot of one in-flight delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Envelope being delivered.
    pub envelope: EnvelopeId,
    /// Subscription it is delivered to.
    pub subscription: SubscriptionId,
    /// Current state.
    pub state: DeliveryState,
}

pub(crate) type DeliveryKey = (EnvelopeId, SubscriptionId);

#[derive(Default)]
pub(crate) struct Ledger {
    records: Mutex<HashMap<DeliveryKey, DeliveryState>>,
    idle: Notify,
}

impl Ledger {
    pub(crate) fn set(&self, key: DeliveryKey, state: DeliveryState) {
        self.records.lock().insert(key, state);
    }

    pub(crate) fn remove(&self, key: DeliveryKey) {
        let empty = {
            let mut records = self.records.lock();
            records.remove(&key);
            records.is_empty()
        };
        if empty {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn clear(&self) {
        self.records.lock().clear();
        self.idle.notify_waiters();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<DeliveryRecord> {
        let mut out: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|(&(envelope, subscription), &state)| DeliveryRecord {
                envelope,
                subscription,
                state,
            })
            .collect();
        out.sort_by_key(|r| (r.subscription, r.envelope));
        out
    }

    /// Waits until the ledger is empty. Returns `false` on timeout.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.len() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
