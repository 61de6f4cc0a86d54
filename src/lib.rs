//! # switchboard
//!
//! **Switchboard** is the messaging substrate of a voice assistant: a typed
//! message bus that lets independent services (speech-to-text, text-to-speech,
//! LLM, storage, UI) talk without knowing about each other, and a supervisor
//! that starts, monitors and stops those services.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ServiceSpec  │   │ ServiceSpec  │   │ ServiceSpec  │
//!     │    (stt)     │   │    (tts)     │   │(orchestrator)│
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - Registry (dependency order, lifecycle state machine)           │
//! │  - failure monitor (background errors, restart policy)            │
//! │  - observer listener (EventStream ──► ObserverSet)                │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        │ start(ctx)       │ start(ctx)       │ start(ctx)    │ start/stop
//!        ▼                  ▼                  ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  MessageBus  (LocalBus │ DistributedBus<B: Broker>)               │
//! │  publish(Event|Command)   request(Query) ──► reply on _reply.<id> │
//! │  per-subscription priority queues, retry, dead letters            │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                          EventStream (broadcast)
//!                                   ▼
//!                     ObserverSet ──► LogWriter, custom observers
//! ```
//!
//! ### Message kinds
//! ```text
//! Event    fire-and-forget notification, every matching subscriber, no retry
//! Command  instruction, every matching subscriber, retried then dead-lettered
//! Query    request expecting exactly one reply, or a timeout
//! ```
//!
//! ### Service lifecycle
//! ```text
//! created ──► starting ──► running ──► stopping ──► stopped
//!                │            │            │
//!                └────────────┴────────────┴──► failed ──► starting (restart)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Envelopes**     | Message taxonomy, priorities, topic patterns.                | [`Envelope`], [`MessageKind`], [`Priority`] |
//! | **Bus**           | Transport-agnostic publish/subscribe/request.                | [`MessageBus`], [`LocalBus`], [`DistributedBus`] |
//! | **Services**      | Lifecycle contract for long-lived components.                | [`Service`], [`ServiceContext`]             |
//! | **Supervision**   | Dependency-ordered start, failure monitoring, shutdown.      | [`Supervisor`]                              |
//! | **Observability** | Delivery and lifecycle events, pluggable observers.          | [`Event`], [`Observe`], [`LogWriter`]       |
//! | **Policies**      | Command retry backoff and service restart.                   | [`BackoffPolicy`], [`RestartPolicy`]        |
//! | **Errors**        | Typed errors per layer.                                      | [`BusError`], [`HandlerError`], [`ServiceError`], [`SupervisorError`] |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use serde_json::json;
//! use switchboard::{
//!     Envelope, HandlerError, HandlerFn, MessageBus, RequestOptions, Service, ServiceContext,
//!     ServiceError, Supervisor, SupervisorConfig,
//! };
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl Service for Clock {
//!     fn name(&self) -> &str {
//!         "clock"
//!     }
//!
//!     async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
//!         let bus = Arc::clone(ctx.bus());
//!         ctx.bus()
//!             .subscribe("Clock.Now", HandlerFn::arc("clock", move |q: Arc<Envelope>| {
//!                 let bus = Arc::clone(&bus);
//!                 async move {
//!                     bus.reply(&q, json!("12:00"))
//!                         .await
//!                         .map_err(|e| HandlerError::fail(e.to_string()))?;
//!                     Ok::<_, HandlerError>(())
//!                 }
//!             }))
//!             .await?;
//!         Ok(())
//!     }
//!
//!     async fn stop(&self) -> Result<(), ServiceError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = SupervisorConfig::default();
//!     cfg.handle_os_signals = false;
//!     cfg.install_global_bus = false;
//!
//!     let sup = Supervisor::builder(cfg).build();
//!     sup.register(Arc::new(Clock))?;
//!     sup.initialize().await?;
//!     sup.start_services().await?;
//!
//!     let res = sup
//!         .bus()
//!         .request("Clock.Now", json!({}), RequestOptions::new(Duration::from_secs(1)))
//!         .await?;
//!     assert_eq!(res.data, Some(json!("12:00")));
//!
//!     sup.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod core;
pub mod envelope;
pub mod error;
pub mod events;
pub mod observers;
pub mod policies;
pub mod runtime;
pub mod services;

// ---- Public re-exports ----

pub use bus::{
    BusRef, BusStats, DeadLetter, DistributedBus, Handler, HandlerFn, HandlerRef, LocalBus,
    MemoryBroker, MessageBus, PublishOptions, RequestOptions, SubscriptionId,
};
pub use core::{
    BusConfig, ServiceFailure, ShutdownHandle, StartupPolicy, Supervisor, SupervisorBuilder,
    SupervisorConfig, TransportMode,
};
pub use envelope::{
    Envelope, EnvelopeBuilder, EnvelopeId, MessageKind, Origin, Priority, PriorityTiers,
    QueryFailure, QueryResult, TopicPattern,
};
pub use error::{BrokerError, BusError, HandlerError, MessageError, ServiceError, SupervisorError};
pub use events::{Event, EventKind, EventStream};
pub use observers::{LogWriter, Observe, ObserverSet};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use services::{Service, ServiceContext, ServiceRef, ServiceSpec, ServiceState};
