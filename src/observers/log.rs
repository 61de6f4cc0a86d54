//! # LogWriter: events to `tracing`.
//!
//! Dead letters and service failures are logged at `error`, other failures
//! and drops at `warn`, lifecycle changes at `info`,
//! and per-envelope traffic at `debug`/`trace`.
//!
//! ```text
//! INFO  service started service="tts"
//! WARN  retry scheduled topic="TTS.Request" subscription="tts" attempt=1 delay_ms=250
//! ERROR dead-lettered topic="TTS.Request" subscription="tts" attempt=3 reason="engine busy"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use crate::events::{Event, EventKind};
use crate::observers::Observe;

/// Observer forwarding every event to the `tracing` facade.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Creates a new writer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Observe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let topic = e.topic.as_deref().unwrap_or("");
        let sub = e.subscription.as_deref().unwrap_or("");
        let service = e.service.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::BusStarted => info!(target: "switchboard::bus", "bus started"),
            EventKind::BusStopped => info!(target: "switchboard::bus", reason, "bus stopped"),
            EventKind::Published => {
                trace!(target: "switchboard::bus", topic, envelope = ?e.envelope, "published")
            }
            EventKind::NoSubscribers => {
                debug!(target: "switchboard::bus", topic, kind = ?e.message, "no subscribers")
            }
            EventKind::Delivered => {
                trace!(target: "switchboard::bus", topic, subscription = sub, "delivered")
            }
            EventKind::HandlerFailed => warn!(
                target: "switchboard::bus",
                topic, subscription = sub, attempt = ?e.attempt, reason,
                "handler failed"
            ),
            EventKind::RetryScheduled => warn!(
                target: "switchboard::bus",
                topic, subscription = sub, attempt = ?e.attempt, delay_ms = ?e.delay_ms,
                "retry scheduled"
            ),
            EventKind::DeadLettered => error!(
                target: "switchboard::bus",
                topic, subscription = sub, attempt = ?e.attempt, reason,
                "dead-lettered"
            ),
            EventKind::Expired => {
                debug!(target: "switchboard::bus", topic, subscription = sub, "expired before dispatch")
            }
            EventKind::Dropped => {
                warn!(target: "switchboard::bus", topic, subscription = sub, reason, "dropped")
            }
            EventKind::ServiceStarting => info!(target: "switchboard::supervisor", service, "service starting"),
            EventKind::ServiceRunning => info!(target: "switchboard::supervisor", service, "service started"),
            EventKind::ServiceFailed => {
                error!(target: "switchboard::supervisor", service, reason, "service failed")
            }
            EventKind::ServiceStopping => info!(target: "switchboard::supervisor", service, "service stopping"),
            EventKind::ServiceStopped => info!(target: "switchboard::supervisor", service, "service stopped"),
            EventKind::ServiceAbandoned => {
                warn!(target: "switchboard::supervisor", service, "service abandoned after grace")
            }
            EventKind::ServiceRestartScheduled => info!(
                target: "switchboard::supervisor",
                service, restart = ?e.attempt, delay_ms = ?e.delay_ms,
                "service restart scheduled"
            ),
            EventKind::ShutdownRequested => info!(target: "switchboard::supervisor", "shutdown requested"),
            EventKind::ObserverPanicked => {
                warn!(target: "switchboard::observers", observer = sub, reason, "observer panicked")
            }
            EventKind::ObserverOverflow => {
                warn!(target: "switchboard::observers", observer = sub, reason, "observer queue overflow")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
