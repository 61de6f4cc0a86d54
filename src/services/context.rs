use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bus::BusRef;
use crate::error::{panic_info, ServiceError};

/// A background failure, tagged with the run of the service that produced it.
#[derive(Debug)]
pub(crate) struct FailureReport {
    pub(crate) service: Arc<str>,
    pub(crate) generation: u64,
    pub(crate) error: ServiceError,
}

/// Cancellation scope of one run (start..stop) of a service.
#[derive(Clone)]
pub(crate) struct ServiceRuntime {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl ServiceRuntime {
    pub(crate) fn new(generation: u64, parent: &CancellationToken) -> Self {
        Self {
            generation,
            token: parent.child_token(),
            tracker: TaskTracker::new(),
        }
    }

    /// Cancels background work and waits up to `limit` for it to exit.
    /// Returns `false` if something was still running.
    pub(crate) async fn wind_down(&self, limit: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();
        tokio::time::timeout(limit, self.tracker.wait()).await.is_ok()
    }
}

/// # Everything a service receives when it is started.
///
/// - [`bus`](ServiceContext::bus): the bus to subscribe and publish on.
/// - [`token`](ServiceContext::token): cancelled when the service is stopped.
/// - [`spawn`](ServiceContext::spawn): runs monitored background work. If it
///   returns an error or panics, the supervisor marks the service `failed`.
///
/// Cheap to clone; clones refer to the same run of the service.
#[derive(Clone)]
pub struct ServiceContext {
    service: Arc<str>,
    bus: BusRef,
    runtime: ServiceRuntime,
    failures: mpsc::UnboundedSender<FailureReport>,
}

impl ServiceContext {
    pub(crate) fn new(
        service: Arc<str>,
        bus: BusRef,
        runtime: ServiceRuntime,
        failures: mpsc::UnboundedSender<FailureReport>,
    ) -> Self {
        Self {
            service,
            bus,
            runtime,
            failures,
        }
    }

    /// Name of the service this context belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The active bus.
    pub fn bus(&self) -> &BusRef {
        &self.bus
    }

    /// Token cancelled when the service is stopped.
    pub fn token(&self) -> CancellationToken {
        self.runtime.token.clone()
    }

    /// Runs `fut` as background work owned by this service.
    ///
    /// The future is dropped when the service stops. Returning `Ok` ends the
    /// task quietly. An `Err` or a panic is reported to the supervisor, which
    /// transitions the service to `failed`.
    ///
    /// # Example
    /// ```no_run
    /// # use std::time::Duration;
    /// # use switchboard::services::ServiceContext;
    /// # use switchboard::ServiceError;
    /// # fn demo(ctx: &ServiceContext) {
    /// let token = ctx.token();
    /// ctx.spawn("heartbeat", async move {
    ///     while !token.is_cancelled() {
    ///         tokio::time::sleep(Duration::from_secs(1)).await;
    ///     }
    ///     Ok::<_, ServiceError>(())
    /// });
    /// # }
    /// ```
    pub fn spawn<F>(&self, task: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let task = task.into();
        let token = self.runtime.token.clone();
        let service = Arc::clone(&self.service);
        let generation = self.runtime.generation;
        let failures = self.failures.clone();

        self.runtime.tracker.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                res = AssertUnwindSafe(fut).catch_unwind() => res,
            };

            let error = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(target: "switchboard::supervisor", service = %service, task = %task, "background task finished");
                    return;
                }
                Ok(Err(err)) => err.to_string(),
                Err(payload) => format!("panicked: {}", panic_info(payload.as_ref())),
            };
            let _ = failures.send(FailureReport {
                service,
                generation,
                error: ServiceError::Background { task, error },
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;

    fn context() -> (ServiceContext, mpsc::UnboundedReceiver<FailureReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rt = ServiceRuntime::new(4, &CancellationToken::new());
        let ctx = ServiceContext::new("stt".into(), Arc::new(LocalBus::default()), rt, tx);
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_background_error_is_reported_with_generation() {
        let (ctx, mut rx) = context();
        ctx.spawn("decoder", async { Err(ServiceError::Start("model missing".into())) });

        let report = rx.recv().await.unwrap();
        assert_eq!(&*report.service, "stt");
        assert_eq!(report.generation, 4);
        assert!(matches!(
            report.error,
            ServiceError::Background { ref task, .. } if task == "decoder"
        ));
    }

    #[tokio::test]
    async fn test_background_panic_is_reported() {
        let (ctx, mut rx) = context();
        let frames: usize = 0;
        ctx.spawn("decoder", async move {
            if frames == 0 {
                panic!("buffer overrun");
            }
            Ok(())
        });

        let report = rx.recv().await.unwrap();
        match report.error {
            ServiceError::Background { error, .. } => assert!(error.contains("buffer overrun")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wind_down_cancels_work() {
        let (ctx, mut rx) = context();
        ctx.spawn("forever", std::future::pending());

        assert!(ctx.runtime.wind_down(Duration::from_secs(1)).await);
        drop(ctx);
        assert!(rx.recv().await.is_none());
    }
}
