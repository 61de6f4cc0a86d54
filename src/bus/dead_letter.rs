use std::time::SystemTime;

use parking_lot::Mutex;

use crate::envelope::Envelope;

/// An envelope that will not be delivered again, with the terminal reason.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    /// The envelope as it was on its last attempt.
    pub envelope: Envelope,
    /// Name of the handler that gave up on it.
    pub handler: String,
    /// Last failure message, or `queue_full`.
    pub reason: String,
    /// When it was dead-lettered.
    pub at: SystemTime,
}

/// Retained dead letters, oldest first.
#[derive(Default)]
pub(crate) struct DeadLetterStore {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterStore {
    pub(crate) fn push(&self, envelope: Envelope, handler: &str, reason: impl Into<String>) {
        self.entries.lock().push(DeadLetter {
            envelope,
            handler: handler.to_string(),
            reason: reason.into(),
            at: SystemTime::now(),
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.lock().clone()
    }

    pub(crate) fn take(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.entries.lock())
    }
}
