//! # Process-wide access to the active bus.
//!
//! Collaborators that are built far from the supervisor (callbacks, plugin
//! factories) reach the bus through here instead of constructor injection.
//!
//! ```text
//! Supervisor::initialize ──► set_bus(bus)
//! anywhere              ──► get_bus()?  (NotInitialized before set_bus)
//! Supervisor::shutdown  ──► teardown()  (stop + clear)
//! ```

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::bus::BusRef;
use crate::error::BusError;

static CURRENT: Lazy<RwLock<Option<BusRef>>> = Lazy::new(|| RwLock::new(None));

/// Installs `bus` as the process-wide bus.
///
/// Replacing a bus that is already installed is allowed but logged.
pub fn set_bus(bus: BusRef) {
    let previous = CURRENT.write().replace(bus);
    if previous.is_some() {
        tracing::warn!(target: "switchboard::runtime", "replacing the installed message bus");
    }
}

/// Returns the installed bus.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use switchboard::{runtime, BusError, LocalBus};
///
/// runtime::clear_bus();
/// assert_eq!(runtime::get_bus().err(), Some(BusError::NotInitialized));
///
/// runtime::set_bus(Arc::new(LocalBus::default()));
/// assert!(runtime::get_bus().is_ok());
/// runtime::clear_bus();
/// ```
pub fn get_bus() -> Result<BusRef, BusError> {
    CURRENT.read().clone().ok_or(BusError::NotInitialized)
}

/// Forgets the installed bus without stopping it. Returns it, if any.
pub fn clear_bus() -> Option<BusRef> {
    CURRENT.write().take()
}

/// Stops the installed bus and clears the reference.
pub async fn teardown() {
    if let Some(bus) = clear_bus() {
        bus.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, MessageBus};
    use std::sync::Arc;

    // The accessor is process-global, so every step lives in one test.
    #[tokio::test]
    async fn test_install_replace_and_teardown() {
        clear_bus();
        assert!(matches!(get_bus(), Err(BusError::NotInitialized)));

        let first = LocalBus::default();
        first.start().await.unwrap();
        set_bus(Arc::new(first.clone()));
        assert!(get_bus().unwrap().is_running());

        let second = LocalBus::default();
        second.start().await.unwrap();
        set_bus(Arc::new(second.clone()));

        teardown().await;
        assert!(!second.is_running());
        assert!(first.is_running());
        assert!(matches!(get_bus(), Err(BusError::NotInitialized)));
        first.stop().await;
    }
}
