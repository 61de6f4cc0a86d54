//! Error types used by the bus, the handlers it drives, and the supervisor.
//!
//! Every enum here follows the same shape:
//!
//! - [`MessageError`]: an envelope could not be built (bad topic, priority, shape).
//! - [`BusError`]: the bus itself refused an operation.
//! - [`HandlerError`]: a subscriber failed while handling one envelope.
//! - [`BrokerError`]: the durable queue behind the distributed bus failed.
//! - [`ServiceError`]: a managed service failed to start, stop, or keep running.
//! - [`SupervisorError`]: the supervisor could not complete a lifecycle step.
//!
//! All of them provide `as_label()` returning a short stable label for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors raised while constructing an envelope.
///
/// These never enter the bus: they are returned synchronously to the caller
/// of `publish`/`request`/`subscribe`.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The combination of kind and fields is not allowed (e.g. an Event with `reply_to`).
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong with the message.
        reason: String,
    },

    /// Priority outside the `0..=99` range.
    #[error("priority {priority} out of range 0..=99")]
    InvalidPriority {
        /// The rejected value.
        priority: i64,
    },

    /// Topic or topic pattern is malformed.
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic {
        /// The rejected topic or pattern.
        topic: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Payload could not be turned into a JSON value.
    #[error("payload is not serializable: {error}")]
    InvalidPayload {
        /// The serializer's message.
        error: String,
    },
}

impl MessageError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use switchboard::MessageError;
    ///
    /// let err = MessageError::InvalidPriority { priority: 120 };
    /// assert_eq!(err.as_label(), "message_invalid_priority");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            MessageError::InvalidMessage { .. } => "message_invalid",
            MessageError::InvalidPriority { .. } => "message_invalid_priority",
            MessageError::InvalidTopic { .. } => "message_invalid_topic",
            MessageError::InvalidPayload { .. } => "message_invalid_payload",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        MessageError::InvalidMessage {
            reason: reason.into(),
        }
    }

    pub(crate) fn topic(topic: &str, reason: &'static str) -> Self {
        MessageError::InvalidTopic {
            topic: topic.to_string(),
            reason,
        }
    }
}

/// # Errors returned by the durable broker behind the distributed bus.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Could not reach the broker, or the broker is closed.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// An envelope could not be encoded or decoded.
    #[error("broker serialisation error: {0}")]
    Serialisation(String),

    /// The named queue does not exist.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Any other backend-specific failure.
    #[error("broker backend error: {0}")]
    Backend(String),
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Connection(_) => "broker_connection",
            BrokerError::Serialisation(_) => "broker_serialisation",
            BrokerError::QueueNotFound(_) => "broker_queue_not_found",
            BrokerError::Backend(_) => "broker_backend",
        }
    }
}

/// # Errors produced by the bus itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// `start()` was called on a bus that is already running.
    #[error("bus already started")]
    AlreadyStarted,

    /// The operation needs a running bus.
    #[error("bus is not started")]
    NotStarted,

    /// The process-wide accessor was read before a bus was installed.
    #[error("message bus not initialized; call set_bus() first")]
    NotInitialized,

    /// A subscription queue rejected the envelope.
    #[error("subscription queue full for topic {topic:?}")]
    QueueFull {
        /// Topic of the rejected envelope.
        topic: String,
    },

    /// Construction of an envelope or pattern failed.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// The broker behind a distributed bus failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use switchboard::BusError;
    ///
    /// assert_eq!(BusError::AlreadyStarted.as_label(), "bus_already_started");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::AlreadyStarted => "bus_already_started",
            BusError::NotStarted => "bus_not_started",
            BusError::NotInitialized => "bus_not_initialized",
            BusError::QueueFull { .. } => "bus_queue_full",
            BusError::Message(e) => e.as_label(),
            BusError::Broker(e) => e.as_label(),
        }
    }
}

/// # Errors produced by a subscriber while handling one envelope.
///
/// Handler errors never reach the publisher. For Commands they drive the
/// retry/dead-letter state machine; for Events and Queries they are only reported.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Handling failed but may succeed if retried.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable failure; a Command is dead-lettered without further retries.
    #[error("handler failed fatally (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The handler panicked.
    #[error("handler panicked: {info}")]
    Panicked {
        /// Panic payload, when it was a string.
        info: String,
    },
}

impl HandlerError {
    /// Shorthand for a retryable failure.
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for a non-retryable failure.
    pub fn fatal(error: impl Into<String>) -> Self {
        HandlerError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Fatal { .. } => "handler_fatal",
            HandlerError::Panicked { .. } => "handler_panicked",
        }
    }

    /// Indicates whether a Command that hit this error may be retried.
    ///
    /// # Example
    /// ```
    /// use switchboard::HandlerError;
    ///
    /// assert!(HandlerError::fail("busy").is_retryable());
    /// assert!(!HandlerError::fatal("bad input").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Fail { .. } | HandlerError::Panicked { .. })
    }
}

/// # Errors produced by a managed service.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// `start()` failed.
    #[error("start failed: {0}")]
    Start(String),

    /// `stop()` failed.
    #[error("stop failed: {0}")]
    Stop(String),

    /// Background work owned by the service failed after it reached `running`.
    #[error("background task {task:?} failed: {error}")]
    Background {
        /// Name given to the background task.
        task: String,
        /// The failure message.
        error: String,
    },

    /// A bus operation issued by the service failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Start(_) => "service_start_failed",
            ServiceError::Stop(_) => "service_stop_failed",
            ServiceError::Background { .. } => "service_background_failed",
            ServiceError::Bus(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the service supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A service with the same name is already registered.
    #[error("service {0:?} already registered")]
    DuplicateService(String),

    /// No service with this name is registered.
    #[error("service {0:?} is not registered")]
    UnknownService(String),

    /// A service depends on a name that is not registered.
    #[error("service {service:?} depends on unknown service {dependency:?}")]
    UnknownDependency {
        /// The dependent service.
        service: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Declared dependencies form a cycle.
    #[error("dependency cycle between services: {0:?}")]
    DependencyCycle(Vec<String>),

    /// A service failed to start and the startup policy is `Abort`.
    #[error("startup aborted: service {service:?} failed: {reason}")]
    StartupAborted {
        /// The service that failed.
        service: String,
        /// The failure message.
        reason: String,
    },

    /// A lifecycle transition that the state machine does not allow.
    #[error("service {service:?}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// The service whose state was to change.
        service: String,
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// Some services did not stop within their grace period and were abandoned.
    #[error("shutdown grace {grace:?} exceeded; abandoned: {stuck:?}")]
    GraceExceeded {
        /// The configured stop grace.
        grace: Duration,
        /// Names of the services that were abandoned.
        stuck: Vec<String>,
    },

    /// The bus could not be prepared or stopped.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use switchboard::SupervisorError;
    /// use std::time::Duration;
    ///
    /// let err = SupervisorError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "supervisor_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::DuplicateService(_) => "supervisor_duplicate_service",
            SupervisorError::UnknownService(_) => "supervisor_unknown_service",
            SupervisorError::UnknownDependency { .. } => "supervisor_unknown_dependency",
            SupervisorError::DependencyCycle(_) => "supervisor_dependency_cycle",
            SupervisorError::StartupAborted { .. } => "supervisor_startup_aborted",
            SupervisorError::InvalidTransition { .. } => "supervisor_invalid_transition",
            SupervisorError::GraceExceeded { .. } => "supervisor_grace_exceeded",
            SupervisorError::Bus(e) => e.as_label(),
        }
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_info(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
