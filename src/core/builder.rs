use std::sync::Arc;

use crate::bus::{BusRef, DistributedBus, LocalBus, MemoryBroker};
use crate::core::{SupervisorConfig, TransportMode};
use crate::observers::Observe;

use super::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`] with an optional custom bus and observers.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    bus: Option<BusRef>,
    observers: Vec<Arc<dyn Observe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            bus: None,
            observers: Vec::new(),
        }
    }

    /// Uses `bus` instead of building one from `SupervisorConfig::bus`.
    ///
    /// This is how a network-backed [`DistributedBus`] is plugged in.
    pub fn with_bus(mut self, bus: BusRef) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets observers for bus and lifecycle events.
    ///
    /// Observers receive events through dedicated workers with bounded queues.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    /// Builds the supervisor. Nothing is started until `initialize()`.
    ///
    /// Without an explicit bus, `TransportMode::Local` yields a [`LocalBus`]
    /// and `TransportMode::Distributed` a [`DistributedBus`] over an
    /// in-process [`MemoryBroker`].
    pub fn build(self) -> Arc<Supervisor> {
        let bus = match self.bus {
            Some(bus) => bus,
            None => default_bus(&self.cfg),
        };
        Arc::new(Supervisor::new_internal(self.cfg, bus, self.observers))
    }
}

fn default_bus(cfg: &SupervisorConfig) -> BusRef {
    match cfg.bus.transport {
        TransportMode::Local => Arc::new(LocalBus::new(cfg.bus.clone())),
        TransportMode::Distributed => {
            if let Some(url) = &cfg.bus.broker_url {
                tracing::warn!(
                    target: "switchboard::supervisor",
                    broker_url = %url,
                    "no broker client configured; using the in-process broker"
                );
            }
            Arc::new(DistributedBus::new(MemoryBroker::new(), cfg.bus.clone()))
        }
    }
}
