//! # Runtime configuration for the bus and the supervisor.
//!
//! Values only: loading them from files or the environment is left to the
//! application.
//!
//! Config is used in three places:
//! 1. **Bus construction**: `LocalBus::new(bus_config)`, `DistributedBus::new(broker, bus_config)`
//! 2. **Supervisor creation**: `Supervisor::builder(config)`
//! 3. **Envelope defaults**: priority tiers and `max_attempts` for `publish`
//!
//! ## Sentinel values
//! - `queue_capacity = 0` → unbounded per-subscription queues
//! - `start_timeout = 0s` → `Service::start` may take as long as it likes
//! - `grace = 0s` / `stop_grace = 0s` → no waiting, cancel/abandon immediately

use std::time::Duration;

use crate::envelope::PriorityTiers;
use crate::policies::{BackoffPolicy, JitterPolicy, RestartPolicy};

/// Which transport backs the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// In-process, memory-only delivery.
    #[default]
    Local,
    /// Delivery through a durable broker (see `bus::distributed`).
    Distributed,
}

/// What the supervisor does when a service fails to start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Stop the startup sequence and return `StartupAborted` (default);
    /// `Supervisor::serve` then shuts down whatever already started.
    ///
    /// Later services may depend on earlier ones implicitly through the bus.
    #[default]
    Abort,
    /// Mark the service `failed` and keep starting the rest; dependents of a
    /// failed service are failed without being started.
    Continue,
}

/// Bus configuration.
///
/// ## Field semantics
/// - `priorities`: priority used when a publisher does not pick one, per origin
/// - `max_attempts`: default attempt budget for Commands
/// - `retry`: delay before redelivering a failed Command (`delay_for(attempts)`)
/// - `grace`: how long `stop()` waits for in-flight deliveries before cancelling
/// - `queue_capacity`: per-subscription ready-queue bound (`0` = unbounded)
/// - `event_capacity`: observability ring size (min 1)
/// - `broker_url`, `poll_interval`, `visibility_timeout`: distributed transport only
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Transport selector.
    pub transport: TransportMode,
    /// Default priority per origin tier.
    pub priorities: PriorityTiers,
    /// Default `max_attempts` for envelopes published without an explicit budget.
    pub max_attempts: u32,
    /// Backoff between Command redeliveries.
    pub retry: BackoffPolicy,
    /// Drain period for `stop()`.
    pub grace: Duration,
    /// Per-subscription queue bound (`0` = unbounded).
    pub queue_capacity: usize,
    /// Capacity of the observability event ring.
    pub event_capacity: usize,
    /// Broker connection string (distributed only).
    pub broker_url: Option<String>,
    /// Sleep between empty broker polls (distributed only).
    pub poll_interval: Duration,
    /// How long a reserved broker message stays invisible before redelivery.
    pub visibility_timeout: Duration,
}

impl BusConfig {
    /// Per-subscription queue bound as an `Option` (`None` = unbounded).
    #[inline]
    pub fn queue_limit(&self) -> Option<usize> {
        if self.queue_capacity == 0 {
            None
        } else {
            Some(self.queue_capacity)
        }
    }

    /// Event ring capacity clamped to a minimum of 1.
    #[inline]
    pub fn event_capacity_clamped(&self) -> usize {
        self.event_capacity.max(1)
    }

    /// Attempt budget clamped to a minimum of 1.
    #[inline]
    pub fn max_attempts_clamped(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for BusConfig {
    /// - `transport = Local`
    /// - `priorities = 10 / 50 / 80` (internal / system / external)
    /// - `max_attempts = 3`
    /// - `retry = 250ms × 2^attempts`, capped at 10s, equal jitter
    /// - `grace = 5s`
    /// - `queue_capacity = 1000`, `event_capacity = 1024`
    /// - `poll_interval = 20ms`, `visibility_timeout = 30s`
    fn default() -> Self {
        Self {
            transport: TransportMode::Local,
            priorities: PriorityTiers::default(),
            max_attempts: 3,
            retry: BackoffPolicy::default(),
            grace: Duration::from_secs(5),
            queue_capacity: 1000,
            event_capacity: 1024,
            broker_url: None,
            poll_interval: Duration::from_millis(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// Supervisor configuration.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Configuration of the bus the supervisor creates (when none is supplied).
    pub bus: BusConfig,
    /// Reaction to a service whose `start` fails.
    pub startup: StartupPolicy,
    /// Default time each `Service::stop` gets before the service is abandoned.
    pub stop_grace: Duration,
    /// Bound on each `Service::start` (`0s` = none).
    pub start_timeout: Duration,
    /// Automatic restart of services that fail after reaching `running`.
    pub restart: RestartPolicy,
    /// Delay between automatic restarts.
    pub restart_backoff: BackoffPolicy,
    /// Listen for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) in `run()`.
    pub handle_os_signals: bool,
    /// Install the bus in the process-wide accessor during `initialize()`.
    pub install_global_bus: bool,
}

impl SupervisorConfig {
    /// Start timeout as an `Option` (`None` = unbounded).
    #[inline]
    pub fn start_timeout_opt(&self) -> Option<Duration> {
        if self.start_timeout == Duration::ZERO {
            None
        } else {
            Some(self.start_timeout)
        }
    }
}

impl Default for SupervisorConfig {
    /// - `startup = Abort`, `stop_grace = 10s`, `start_timeout = 30s`
    /// - `restart = Never`, `restart_backoff = 1s × 2^n` capped at 30s
    /// - `handle_os_signals = true`, `install_global_bus = true`
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            startup: StartupPolicy::Abort,
            stop_grace: Duration::from_secs(10),
            start_timeout: Duration::from_secs(30),
            restart: RestartPolicy::Never,
            restart_backoff: BackoffPolicy::exponential(
                Duration::from_secs(1),
                Duration::from_secs(30),
            )
            .with_jitter(JitterPolicy::Full),
            handle_os_signals: true,
            install_global_bus: true,
        }
    }
}
