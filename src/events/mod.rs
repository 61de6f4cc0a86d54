//! Observability events: types and broadcast stream.
//!
//! Delivery outcomes and service lifecycle changes are published as
//! [`Event`]s on an [`EventStream`]. The stream is a side channel, never a
//! bus topic, so observing the bus does not generate more bus traffic.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] classification and metadata
//! - [`EventStream`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `LocalBus` / `DistributedBus` deliveries, `Supervisor`
//!   lifecycle transitions, `ObserverSet` workers (overflow/panic).
//! - **Consumers**: `ObserverSet` (via the supervisor's listener) or anything
//!   holding a receiver from [`EventStream::subscribe`].

mod event;
mod stream;

pub use event::{Event, EventKind};
pub use stream::EventStream;
