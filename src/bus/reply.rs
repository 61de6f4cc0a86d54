//! One-shot reply plumbing shared by every `request()` implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handler::Handler;
use crate::envelope::{Envelope, QueryFailure, QueryResult};
use crate::error::HandlerError;

/// Fresh private topic for one request's reply.
pub(crate) fn reply_topic() -> String {
    format!("_reply.{}", Uuid::new_v4().simple())
}

/// Forwards the first reply payload to the waiting `request`; later replies are ignored.
pub(crate) struct ReplySlot {
    tx: Mutex<Option<oneshot::Sender<Value>>>,
}

impl ReplySlot {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (slot, rx)
    }
}

#[async_trait]
impl Handler for ReplySlot {
    async fn handle(&self, env: Arc<Envelope>) -> Result<(), HandlerError> {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(env.payload().clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "reply"
    }
}

/// Waits for the reply, the timeout, or the bus stopping, whichever comes first.
pub(crate) async fn await_reply(
    rx: oneshot::Receiver<Value>,
    timeout: Duration,
    stopping: &CancellationToken,
) -> QueryResult {
    tokio::select! {
        res = tokio::time::timeout(timeout, rx) => match res {
            Ok(Ok(data)) => QueryResult::reply(data),
            Ok(Err(_)) => QueryResult::failed(QueryFailure::Cancelled),
            Err(_) => QueryResult::failed(QueryFailure::Timeout),
        },
        _ = stopping.cancelled() => QueryResult::failed(QueryFailure::Cancelled),
    }
}
