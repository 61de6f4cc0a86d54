//! Managed services and the contract the supervisor drives them through.
//!
//! ## Contents
//! - [`Service`] / [`ServiceRef`] the two-method capability every service implements
//! - [`ServiceContext`] what `start` receives: the bus, a stop token, monitored `spawn`
//! - [`ServiceSpec`] a service plus its dependencies and stop grace
//! - [`ServiceState`] the per-service lifecycle state machine
//!
//! ```text
//! created ──► starting ──► running ──► stopping ──► stopped
//!                │            │            │
//!                └──► failed ◄┘            └──► failed (abandoned after grace)
//! ```

mod context;
mod service;
mod spec;
mod state;

pub use context::ServiceContext;
pub use service::{Service, ServiceRef};
pub use spec::ServiceSpec;
pub use state::ServiceState;

pub(crate) use context::{FailureReport, ServiceRuntime};
