//! Per-subscription ready queue: lowest priority value first, then FIFO.
//!
//! Single consumer (the subscription's worker), many producers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::envelope::Envelope;

struct Entry {
    priority: u8,
    seq: u64,
    envelope: Arc<Envelope>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: the "greatest" entry is the one to deliver next.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Entry>,
    seq: u64,
    closed: bool,
}

/// Result of [`ReadyQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    Full,
    Closed,
}

pub(crate) struct ReadyQueue {
    state: Mutex<State>,
    ready: Notify,
    limit: Option<usize>,
}

impl ReadyQueue {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            limit,
        }
    }

    /// Enqueues an envelope. `bounded = false` is used for redeliveries,
    /// which were already admitted once and must not be lost to the limit.
    pub(crate) fn push(&self, envelope: Arc<Envelope>, bounded: bool) -> Push {
        {
            let mut st = self.state.lock();
            if st.closed {
                return Push::Closed;
            }
            if bounded && self.limit.is_some_and(|cap| st.heap.len() >= cap) {
                return Push::Full;
            }
            st.seq += 1;
            let seq = st.seq;
            st.heap.push(Entry {
                priority: envelope.priority().get(),
                seq,
                envelope,
            });
        }
        self.ready.notify_one();
        Push::Queued
    }

    /// Waits for the next envelope. Returns `None` once the queue is closed and empty.
    pub(crate) async fn pop(&self) -> Option<Arc<Envelope>> {
        loop {
            {
                let mut st = self.state.lock();
                if let Some(entry) = st.heap.pop() {
                    return Some(entry.envelope);
                }
                if st.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    /// Removes everything still queued.
    pub(crate) fn drain(&self) -> Vec<Arc<Envelope>> {
        let mut st = self.state.lock();
        std::mem::take(&mut st.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|e| e.envelope)
            .collect()
    }

    /// Rejects further pushes, wakes the consumer, and returns what was queued.
    pub(crate) fn close(&self) -> Vec<Arc<Envelope>> {
        let rest = {
            self.state.lock().closed = true;
            self.drain()
        };
        self.ready.notify_one();
        rest
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().heap.len()
    }
}
