use std::time::Duration;

use serde_json::Value;

use crate::core::BusConfig;
use crate::envelope::{Envelope, EnvelopeBuilder, MessageKind, Origin};
use crate::error::MessageError;

/// Options for `publish`.
///
/// Only Events and Commands can be published directly; Queries go through
/// `request`, which owns the reply topic.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use switchboard::{MessageKind, Origin, PublishOptions};
///
/// let opts = PublishOptions::command()
///     .with_priority(5)
///     .with_origin(Origin::System)
///     .with_max_attempts(5)
///     .with_deadline(Duration::from_secs(2));
/// assert_eq!(opts.kind(), MessageKind::Command);
/// ```
#[derive(Clone, Debug)]
pub struct PublishOptions {
    kind: MessageKind,
    priority: Option<u8>,
    origin: Origin,
    max_attempts: Option<u32>,
    deadline: Option<Duration>,
    correlation_id: Option<String>,
}

impl PublishOptions {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            priority: None,
            origin: Origin::Internal,
            max_attempts: None,
            deadline: None,
            correlation_id: None,
        }
    }

    /// Broadcast, best-effort, no retry.
    pub fn event() -> Self {
        Self::new(MessageKind::Event)
    }

    /// Reliable delivery with retry and dead-lettering.
    pub fn command() -> Self {
        Self::new(MessageKind::Command)
    }

    /// Kind of envelope these options produce.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Explicit priority (`0..=99`, lower first).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Origin; picks the default priority tier when no priority is given.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Attempt budget. Events are always sent with a budget of one.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    /// Time-to-live; undelivered copies are dropped once it passes.
    pub fn with_deadline(mut self, ttl: Duration) -> Self {
        self.deadline = Some(ttl);
        self
    }

    /// Trace identifier carried on the envelope.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub(crate) fn build(
        self,
        topic: &str,
        payload: Value,
        cfg: &BusConfig,
    ) -> Result<Envelope, MessageError> {
        let attempts = match self.kind {
            MessageKind::Command => self.max_attempts.unwrap_or(cfg.max_attempts_clamped()),
            _ => 1,
        };
        Envelope::builder(topic, self.kind)
            .payload(payload)
            .priority_opt(self.priority)
            .origin(self.origin)
            .max_attempts(attempts)
            .deadline_opt(self.deadline)
            .correlation_id_opt(self.correlation_id)
            .build_with(&cfg.priorities)
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::event()
    }
}

/// Options for `request`.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// How long to wait for the reply.
    pub timeout: Duration,
    /// Explicit priority (`None` = origin tier).
    pub priority: Option<u8>,
    /// Origin of the query.
    pub origin: Origin,
}

impl RequestOptions {
    /// Options with the given timeout and default priority/origin.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            priority: None,
            origin: Origin::Internal,
        }
    }

    /// Explicit priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Origin of the query.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Builds the query envelope. The query expires together with the request,
    /// so a late responder never sees it.
    pub(crate) fn build(
        &self,
        topic: &str,
        payload: Value,
        reply_to: &str,
        cfg: &BusConfig,
    ) -> Result<Envelope, MessageError> {
        let builder: EnvelopeBuilder = Envelope::query(topic, payload, reply_to)
            .priority_opt(self.priority)
            .origin(self.origin)
            .max_attempts(1)
            .deadline(self.timeout);
        let env = builder.build_with(&cfg.priorities)?;
        let id = env.id().to_string();
        Ok(env.with_correlation_id(id))
    }
}

impl Default for RequestOptions {
    /// 5 second timeout.
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
