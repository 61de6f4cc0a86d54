//! # Service specification for supervised execution.
//!
//! [`ServiceSpec`] bundles a service with what the supervisor needs to know
//! about it: which services must be running first, and how long `stop` may take.

use std::sync::Arc;
use std::time::Duration;

use super::{Service, ServiceRef};

/// A service plus its supervision settings.
///
/// ## Example
/// ```rust
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # use switchboard::services::{Service, ServiceContext, ServiceSpec};
/// # use switchboard::ServiceError;
/// # struct Orchestrator;
/// # #[async_trait]
/// # impl Service for Orchestrator {
/// #     fn name(&self) -> &str { "orchestrator" }
/// #     async fn start(&self, _ctx: ServiceContext) -> Result<(), ServiceError> { Ok(()) }
/// #     async fn stop(&self) -> Result<(), ServiceError> { Ok(()) }
/// # }
/// use std::time::Duration;
///
/// let spec = ServiceSpec::new(Arc::new(Orchestrator))
///     .depends_on("stt")
///     .depends_on("tts")
///     .with_stop_grace(Duration::from_secs(2));
///
/// assert_eq!(spec.name(), "orchestrator");
/// assert_eq!(spec.dependencies(), ["stt", "tts"]);
/// ```
#[derive(Clone)]
pub struct ServiceSpec {
    service: ServiceRef,
    depends_on: Vec<String>,
    stop_grace: Option<Duration>,
}

impl ServiceSpec {
    /// Wraps `service` with no dependencies and the supervisor's default stop grace.
    pub fn new(service: ServiceRef) -> Self {
        Self {
            service,
            depends_on: Vec::new(),
            stop_grace: None,
        }
    }

    /// Requires `name` to be running before this service starts.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
        self
    }

    /// Overrides `SupervisorConfig::stop_grace` for this service.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        self.service.name()
    }

    /// The wrapped service.
    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    /// Names this service depends on, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// Per-service stop grace, if overridden.
    pub fn stop_grace(&self) -> Option<Duration> {
        self.stop_grace
    }
}

impl<S: Service> From<Arc<S>> for ServiceSpec {
    fn from(service: Arc<S>) -> Self {
        Self::new(service)
    }
}

impl From<ServiceRef> for ServiceSpec {
    fn from(service: ServiceRef) -> Self {
        Self::new(service)
    }
}
