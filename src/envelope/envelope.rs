//! # The envelope: routing metadata around an opaque payload.
//!
//! Envelopes are built once through [`EnvelopeBuilder`] and validated at
//! construction; afterwards only the bus touches them (it increments
//! `attempts` when a Command handler fails).
//!
//! ## Invariants
//! - `id` is unique (UUID v4) and never changes.
//! - `priority` is always within `0..=99`.
//! - `reply_to` is set on every Query and on nothing else.
//! - `1 <= max_attempts` and `attempts <= max_attempts`.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::kind::{MessageKind, Origin, Priority, PriorityTiers};
use super::topic::validate_topic;
use crate::error::MessageError;

/// Unique identifier of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport envelope for every message placed on the bus.
///
/// Decoding runs the same checks as [`EnvelopeBuilder::build`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Envelope {
    id: EnvelopeId,
    #[serde(rename = "type")]
    topic: String,
    kind: MessageKind,
    payload: Value,
    reply_to: Option<String>,
    correlation_id: Option<String>,
    timestamp: SystemTime,
    origin: Origin,
    priority: Priority,
    deadline_ms: Option<u64>,
    attempts: u32,
    max_attempts: u32,
}

/// Wire shape of [`Envelope`] before validation.
#[derive(Deserialize)]
struct RawEnvelope {
    id: EnvelopeId,
    #[serde(rename = "type")]
    topic: String,
    kind: MessageKind,
    payload: Value,
    reply_to: Option<String>,
    correlation_id: Option<String>,
    timestamp: SystemTime,
    origin: Origin,
    priority: Priority,
    deadline_ms: Option<u64>,
    attempts: u32,
    max_attempts: u32,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = MessageError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        check_routing(&raw.topic, raw.kind, raw.reply_to.as_deref())?;
        check_max_attempts(raw.max_attempts)?;
        if raw.attempts > raw.max_attempts {
            return Err(MessageError::invalid("attempts exceed max_attempts"));
        }

        Ok(Envelope {
            id: raw.id,
            topic: raw.topic,
            kind: raw.kind,
            payload: raw.payload,
            reply_to: raw.reply_to,
            correlation_id: raw.correlation_id,
            timestamp: raw.timestamp,
            origin: raw.origin,
            priority: raw.priority,
            deadline_ms: raw.deadline_ms,
            attempts: raw.attempts,
            max_attempts: raw.max_attempts,
        })
    }
}

fn check_routing(
    topic: &str,
    kind: MessageKind,
    reply_to: Option<&str>,
) -> Result<(), MessageError> {
    validate_topic(topic)?;

    match (kind, reply_to) {
        (MessageKind::Event, Some(_)) => {
            Err(MessageError::invalid("an event cannot carry reply_to"))
        }
        (MessageKind::Command, Some(_)) => {
            Err(MessageError::invalid("reply_to is reserved for queries"))
        }
        (MessageKind::Query, None) => {
            Err(MessageError::invalid("a query needs a reply_to topic"))
        }
        (MessageKind::Query, Some(reply)) => validate_topic(reply),
        _ => Ok(()),
    }
}

fn check_max_attempts(max_attempts: u32) -> Result<(), MessageError> {
    if max_attempts == 0 {
        return Err(MessageError::invalid("max_attempts must be at least 1"));
    }
    Ok(())
}

impl Envelope {
    /// Starts building an envelope of the given kind.
    pub fn builder(topic: impl Into<String>, kind: MessageKind) -> EnvelopeBuilder {
        EnvelopeBuilder::new(topic.into(), kind)
    }

    /// Shorthand for `Envelope::builder(topic, MessageKind::Event).payload(payload)`.
    pub fn event(topic: impl Into<String>, payload: Value) -> EnvelopeBuilder {
        Self::builder(topic, MessageKind::Event).payload(payload)
    }

    /// Shorthand for `Envelope::builder(topic, MessageKind::Command).payload(payload)`.
    pub fn command(topic: impl Into<String>, payload: Value) -> EnvelopeBuilder {
        Self::builder(topic, MessageKind::Command).payload(payload)
    }

    /// Shorthand for a Query answered on `reply_to`.
    pub fn query(
        topic: impl Into<String>,
        payload: Value,
        reply_to: impl Into<String>,
    ) -> EnvelopeBuilder {
        Self::builder(topic, MessageKind::Query)
            .payload(payload)
            .reply_to(reply_to)
    }

    /// Unique id.
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// Topic used for routing (the envelope's `type`).
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Delivery contract.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Domain payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Topic the responder must publish to (Queries only).
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Trace identifier shared by a request and its reply.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Creation time.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Where the message came from.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Delivery priority (lower first).
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Time-to-live in milliseconds from `timestamp`, if any.
    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Failed delivery attempts so far (Commands only).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts allowed before the envelope is dead-lettered.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| MessageError::InvalidPayload {
            error: e.to_string(),
        })
    }

    /// Returns `true` if the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        match self.deadline_ms {
            None => false,
            Some(ms) => match now.duration_since(self.timestamp) {
                Ok(elapsed) => elapsed >= Duration::from_millis(ms),
                Err(_) => false,
            },
        }
    }

    /// Returns `true` if the deadline has already passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Records one failed attempt and returns the new count (never above `max_attempts`).
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.attempts
    }

    /// Replaces the correlation id (used once the id is known, e.g. `request`).
    pub(crate) fn with_correlation_id(mut self, id: String) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Marks a Command as exhausted so it is not retried again.
    pub(crate) fn exhaust(&mut self) {
        self.attempts = self.max_attempts;
    }
}

/// Builder validating an [`Envelope`] at construction.
///
/// ## Example
/// ```rust
/// use serde_json::json;
/// use switchboard::{Envelope, MessageKind, Origin};
///
/// let env = Envelope::command("TTS.Request", json!({ "text": "hi" }))
///     .priority(10)
///     .origin(Origin::Internal)
///     .max_attempts(5)
///     .build()
///     .unwrap();
///
/// assert_eq!(env.kind(), MessageKind::Command);
/// assert_eq!(env.priority().get(), 10);
///
/// // Events never carry a reply topic.
/// assert!(Envelope::event("TTS.Started", json!(null)).reply_to("x.y").build().is_err());
/// ```
#[derive(Clone, Debug)]
pub struct EnvelopeBuilder {
    topic: String,
    kind: MessageKind,
    payload: Value,
    priority: Option<u8>,
    origin: Origin,
    reply_to: Option<String>,
    correlation_id: Option<String>,
    max_attempts: u32,
    deadline: Option<Duration>,
}

impl EnvelopeBuilder {
    fn new(topic: String, kind: MessageKind) -> Self {
        Self {
            topic,
            kind,
            payload: Value::Null,
            priority: None,
            origin: Origin::default(),
            reply_to: None,
            correlation_id: None,
            max_attempts: 3,
            deadline: None,
        }
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets an explicit priority (validated at `build`).
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets an optional explicit priority; `None` falls back to the origin tier.
    pub fn priority_opt(mut self, priority: Option<u8>) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the origin.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Sets the reply topic (Queries only).
    pub fn reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }

    /// Sets the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets an optional correlation id.
    pub fn correlation_id_opt(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    /// Sets the attempt budget (default 3).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Sets a time-to-live measured from construction.
    pub fn deadline(mut self, ttl: Duration) -> Self {
        self.deadline = Some(ttl);
        self
    }

    /// Sets an optional time-to-live.
    pub fn deadline_opt(mut self, ttl: Option<Duration>) -> Self {
        self.deadline = ttl;
        self
    }

    /// Validates and builds using the default priority tiers.
    pub fn build(self) -> Result<Envelope, MessageError> {
        self.build_with(&PriorityTiers::default())
    }

    /// Validates and builds, resolving a missing priority through `tiers`.
    pub fn build_with(self, tiers: &PriorityTiers) -> Result<Envelope, MessageError> {
        check_routing(&self.topic, self.kind, self.reply_to.as_deref())?;
        check_max_attempts(self.max_attempts)?;

        let priority = match self.priority {
            Some(p) => Priority::new(p)?,
            None => tiers.for_origin(self.origin),
        };

        let deadline_ms = self
            .deadline
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64);

        Ok(Envelope {
            id: EnvelopeId::new(),
            topic: self.topic,
            kind: self.kind,
            payload: self.payload,
            reply_to: self.reply_to,
            correlation_id: self.correlation_id,
            timestamp: SystemTime::now(),
            origin: self.origin,
            priority,
            deadline_ms,
            attempts: 0,
            max_attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builds_command_with_defaults() {
        let env = Envelope::command("TTS.Request", json!({"text": "hi"}))
            .build()
            .unwrap();
        assert_eq!(env.topic(), "TTS.Request");
        assert_eq!(env.kind(), MessageKind::Command);
        assert_eq!(env.origin(), Origin::Internal);
        assert_eq!(env.priority().get(), 10);
        assert_eq!(env.attempts(), 0);
        assert_eq!(env.max_attempts(), 3);
        assert!(env.reply_to().is_none());
    }

    #[test]
    fn test_default_priority_follows_origin() {
        let env = Envelope::event("Web.Hook", json!(1))
            .origin(Origin::External)
            .build()
            .unwrap();
        assert_eq!(env.priority().get(), 80);
    }

    #[test]
    fn test_event_with_reply_to_is_rejected() {
        let err = Envelope::event("TTS.Started", json!(null))
            .reply_to("reply.x")
            .build()
            .unwrap_err();
        assert_eq!(err.as_label(), "message_invalid");
    }

    #[test]
    fn test_query_requires_reply_to() {
        assert!(Envelope::builder("DB.Get", MessageKind::Query).build().is_err());
        assert!(Envelope::query("DB.Get", json!({}), "_reply.abc").build().is_ok());
    }

    #[test]
    fn test_priority_out_of_range_is_rejected() {
        let err = Envelope::command("TTS.Request", json!(null))
            .priority(100)
            .build()
            .unwrap_err();
        assert_eq!(err, MessageError::InvalidPriority { priority: 100 });
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        assert!(Envelope::command("TTS.Request", json!(null))
            .max_attempts(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::event("A.B", json!(null)).build().unwrap();
        let b = Envelope::event("A.B", json!(null)).build().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_attempts_never_exceed_max() {
        let mut env = Envelope::command("A.B", json!(null))
            .max_attempts(2)
            .build()
            .unwrap();
        assert_eq!(env.record_failure(), 1);
        assert_eq!(env.record_failure(), 2);
        assert_eq!(env.record_failure(), 2);
    }

    #[test]
    fn test_expiry_uses_deadline() {
        let env = Envelope::event("A.B", json!(null))
            .deadline(Duration::from_millis(50))
            .build()
            .unwrap();
        assert!(!env.is_expired_at(env.timestamp()));
        assert!(env.is_expired_at(env.timestamp() + Duration::from_millis(51)));

        let forever = Envelope::event("A.B", json!(null)).build().unwrap();
        assert!(!forever.is_expired_at(forever.timestamp() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_survives_json_round_trip() {
        let env = Envelope::query("DB.Get", json!({"id": 7}), "_reply.1")
            .correlation_id("trace-1")
            .build()
            .unwrap();
        let wire = serde_json::to_vec(&env).unwrap();
        let back: Envelope = serde_json::from_slice(&wire).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_decoding_rejects_what_the_builder_rejects() {
        let env = Envelope::command("TTS.Request", json!(null))
            .max_attempts(2)
            .build()
            .unwrap();
        let wire = serde_json::to_value(&env).unwrap();

        let mut over = wire.clone();
        over["attempts"] = json!(3);
        assert!(serde_json::from_value::<Envelope>(over).is_err());

        let mut zero = wire.clone();
        zero["max_attempts"] = json!(0);
        zero["attempts"] = json!(0);
        assert!(serde_json::from_value::<Envelope>(zero).is_err());

        let mut reply = wire.clone();
        reply["reply_to"] = json!("_reply.1");
        assert!(serde_json::from_value::<Envelope>(reply).is_err());

        let mut topic = wire.clone();
        topic["type"] = json!("TTS.*");
        assert!(serde_json::from_value::<Envelope>(topic).is_err());

        let mut priority = wire.clone();
        priority["priority"] = json!(100);
        assert!(serde_json::from_value::<Envelope>(priority).is_err());

        assert_eq!(serde_json::from_value::<Envelope>(wire).unwrap(), env);
    }
}
