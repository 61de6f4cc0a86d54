//! Runtime core: configuration, the supervisor, and shutdown handling.
//!
//! The public API from this module is [`Supervisor`] (built through
//! [`SupervisorBuilder`]), its configuration types, and [`ShutdownHandle`].
//!
//! Internal modules:
//! - [`config`]: bus and supervisor configuration values;
//! - [`registry`]: registration order, dependency ordering, per-service state;
//! - [`supervisor`]: start/monitor/stop of services around one bus;
//! - [`shutdown`]: programmatic and OS-signal shutdown triggers;
//! - [`builder`]: picks the bus and observers.

mod builder;
mod config;
mod registry;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{BusConfig, StartupPolicy, SupervisorConfig, TransportMode};
pub use registry::ServiceFailure;
pub use shutdown::ShutdownHandle;
pub use supervisor::Supervisor;
