//! Envelope and message taxonomy.
//!
//! The [`Envelope`] is the only unit ever placed on the bus. It wraps an
//! opaque JSON payload with routing metadata (topic, priority, origin,
//! reply topic) and the retry counters the bus maintains for Commands.
//!
//! ## Contents
//! - [`Envelope`], [`EnvelopeBuilder`], [`EnvelopeId`] the wire-level wrapper
//! - [`MessageKind`] Event / Command / Query and their delivery contracts
//! - [`Origin`], [`Priority`], [`PriorityTiers`] routing metadata
//! - [`QueryResult`], [`QueryFailure`] what `request()` resolves to
//! - [`TopicPattern`] subscription patterns with `*` / `**` wildcards
//!
//! ## Delivery contracts
//! ```text
//! Event   ── broadcast, best-effort, never retried
//! Command ── retried on handler failure up to max_attempts, then dead-lettered
//! Query   ── one logical reply expected on reply_to, or the requester times out
//! ```

mod envelope;
mod kind;
mod query;
mod topic;

pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeId};
pub use kind::{MessageKind, Origin, Priority, PriorityTiers};
pub use query::{QueryFailure, QueryResult};
pub use topic::TopicPattern;

