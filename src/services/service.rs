use std::sync::Arc;

use async_trait::async_trait;

use super::ServiceContext;
use crate::error::ServiceError;

/// Shared handle to a service.
pub type ServiceRef = Arc<dyn Service>;

/// # A long-lived participant on the bus.
///
/// The supervisor treats every service the same way: it calls
/// [`start`](Service::start) once the bus is up and [`stop`](Service::stop)
/// during shutdown (in reverse start order).
///
/// - `start` registers subscriptions and launches background work through
///   [`ServiceContext::spawn`], then returns. It must not block forever.
/// - `stop` unsubscribes and releases resources. It may be called after a
///   failed or partial `start`, so it must tolerate missing state.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use parking_lot::Mutex;
/// use switchboard::bus::{HandlerFn, SubscriptionId};
/// use switchboard::services::{Service, ServiceContext};
/// use switchboard::{BusRef, Envelope, HandlerError, MessageBus, ServiceError};
///
/// #[derive(Default)]
/// struct Tts {
///     sub: Mutex<Option<(BusRef, SubscriptionId)>>,
/// }
///
/// #[async_trait]
/// impl Service for Tts {
///     fn name(&self) -> &str { "tts" }
///
///     async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
///         let id = ctx.bus().subscribe("TTS.Request", HandlerFn::arc("tts", |_env: Arc<Envelope>| async {
///             Ok::<_, HandlerError>(())
///         })).await?;
///         *self.sub.lock() = Some((ctx.bus().clone(), id));
///         Ok(())
///     }
///
///     async fn stop(&self) -> Result<(), ServiceError> {
///         let sub = self.sub.lock().take();
///         if let Some((bus, id)) = sub {
///             bus.unsubscribe(id).await;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Stable, unique service name.
    fn name(&self) -> &str;

    /// Subscribes, spawns background work, and returns once initialized.
    async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError>;

    /// Unsubscribes and releases resources. Must be safe after a partial `start`.
    async fn stop(&self) -> Result<(), ServiceError>;
}
