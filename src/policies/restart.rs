//! # Restart policy for supervised services.
//!
//! [`RestartPolicy`] decides what the supervisor does when a service that
//! reached `running` later fails (a background task it owns errors or panics).
//!
//! ```text
//! RestartPolicy::Never                       → service stays `failed`, operator decides
//! RestartPolicy::OnFailure { max_restarts }  → restart after SupervisorConfig::restart_backoff,
//!                                              at most `max_restarts` times
//! ```

/// Policy controlling whether a failed service is restarted automatically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart automatically (default). The failure is exposed through
    /// `Supervisor::failures()` and `Supervisor::restart()` stays available.
    #[default]
    Never,
    /// Restart on failure, up to `max_restarts` times over the supervisor's lifetime.
    OnFailure {
        /// Upper bound on automatic restarts for one service.
        max_restarts: u32,
    },
}

impl RestartPolicy {
    /// Returns `true` if a service that has already been restarted `restarts`
    /// times may be restarted once more.
    pub fn allows(&self, restarts: u32) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure { max_restarts } => restarts < *max_restarts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_refuses_every_restart() {
        assert!(!RestartPolicy::Never.allows(0));
    }

    #[test]
    fn test_on_failure_counts_restarts() {
        let policy = RestartPolicy::OnFailure { max_restarts: 2 };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }
}
