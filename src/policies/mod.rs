//! Retry and restart policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays grow (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//! - [`RestartPolicy`] whether the supervisor restarts a failed service
//!
//! ## Where they are used
//! ```text
//! BusConfig::retry        ──► Command redelivery after a handler failure
//!                              (delay = first × factor^attempts, jittered)
//! SupervisorConfig::restart          ──► Never | OnFailure { max_restarts }
//! SupervisorConfig::restart_backoff  ──► delay before each automatic restart
//! ```
//!
//! ## Defaults
//! - Command retry: first=250ms, factor=2.0, max=10s, jitter=Equal.
//! - `RestartPolicy::Never`: a crashed service stays `failed` until an operator restarts it.

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
