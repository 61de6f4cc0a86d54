//! # Subscription handlers.
//!
//! A [`Handler`] receives one shared [`Envelope`] per delivery and returns
//! `Ok(())` on success. Errors and panics are contained by the bus: for
//! Commands they drive retry/dead-letter, for Events and Queries they are only
//! reported on the observability stream.
//!
//! [`HandlerFn`] wraps a closure that builds a fresh future per delivery.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::HandlerError;

static SUBSCRIPTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(SUBSCRIPTION_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// # Envelope consumer registered on a topic pattern.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use switchboard::{Envelope, Handler, HandlerError};
///
/// struct Speaker;
///
/// #[async_trait]
/// impl Handler for Speaker {
///     async fn handle(&self, env: Arc<Envelope>) -> Result<(), HandlerError> {
///         let text = env.payload()["text"].as_str().ok_or_else(|| HandlerError::fatal("no text"))?;
///         let _ = text; // synthesize...
///         Ok(())
///     }
///     fn name(&self) -> &str { "tts" }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles one delivery.
    async fn handle(&self, envelope: Arc<Envelope>) -> Result<(), HandlerError>;

    /// Name used in logs, events and dead-letter entries.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Closure-backed handler.
#[derive(Debug)]
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a named closure handler.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the handler as a shared handle.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use switchboard::{Envelope, HandlerError, HandlerFn, HandlerRef};
    ///
    /// let h: HandlerRef = HandlerFn::arc("ui", |_env: Arc<Envelope>| async {
    ///     Ok::<_, HandlerError>(())
    /// });
    /// assert_eq!(h.name(), "ui");
    /// ```
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, envelope: Arc<Envelope>) -> Result<(), HandlerError> {
        (self.f)(envelope).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
