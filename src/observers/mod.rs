//! # Pluggable consumers of observability events.
//!
//! An observer implements [`Observe`] and is driven by its own worker fed by a
//! bounded queue inside [`ObserverSet`]. Slow or panicking observers never
//! block the bus, the supervisor, or each other.
//!
//! ```text
//! EventStream ──► supervisor listener ──► ObserverSet::emit_arc()
//!                                              ├──► [queue] ──► LogWriter
//!                                              └──► [queue] ──► custom observer
//! ```
//!
//! Built in: [`LogWriter`], which forwards every event to `tracing`.

mod log;
mod observe;
mod set;

pub use log::LogWriter;
pub use observe::Observe;
pub use set::ObserverSet;
