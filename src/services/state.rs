use std::fmt;

use serde::Serialize;

/// Lifecycle state of one managed service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Registered, never started.
    Created,
    /// `start()` is running.
    Starting,
    /// `start()` returned successfully.
    Running,
    /// `start()` failed, background work failed, or `stop()` was abandoned.
    Failed,
    /// `stop()` is running.
    Stopping,
    /// `stop()` completed.
    Stopped,
}

impl ServiceState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Created => "created",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Failed => "failed",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
        }
    }

    /// Whether the state machine allows `self → next`.
    ///
    /// ```
    /// use switchboard::services::ServiceState::*;
    ///
    /// assert!(Created.can_transition_to(Starting));
    /// assert!(Running.can_transition_to(Stopping));
    /// assert!(!Stopped.can_transition_to(Running));
    /// ```
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Created, Failed)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Failed)
                | (Running, Stopping)
                | (Failed, Starting)
                | (Failed, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Starting)
        )
    }

    /// `true` for states in which the service is not doing anything.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServiceState::Created | ServiceState::Failed | ServiceState::Stopped
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
