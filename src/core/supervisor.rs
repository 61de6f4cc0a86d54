//! # Supervisor: service lifecycle around one bus.
//!
//! The [`Supervisor`] owns the bus, the registered services, and the
//! observers. It starts services in dependency order, watches their
//! background work, and stops everything in reverse order.
//!
//! ## High-level architecture
//! ```text
//! serve():
//!   initialize()      observer listener ─► bus.start() ─► runtime::set_bus() ─► failure monitor
//!   start_services()  for name in start_order():
//!                        created ─► starting ─► service.start(ctx) ─► running
//!                                                    └─ Err / panic / timeout ─► failed
//!                                                         ├─ StartupPolicy::Abort    → return StartupAborted
//!                                                         └─ StartupPolicy::Continue → next service
//!   run()             wait for ShutdownHandle::request() or an OS signal
//!   shutdown()        for name in start_order().rev():
//!                        running/failed ─► stopping ─► service.stop() + cancel ctx work ─► stopped
//!                                                         └─ grace exceeded ─► abandoned (failed)
//!                     bus.stop() ─► runtime::clear_bus() ─► observers drained
//!
//! Monitoring:
//!   ctx.spawn(task) ── Err / panic ──► failure channel ──► monitor
//!                                          ├─ stale generation → ignored
//!                                          └─ running → failed ─► RestartPolicy?
//!                                                                   └─ sleep(restart_backoff) → restart
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use switchboard::services::{Service, ServiceContext};
//! use switchboard::{ServiceError, Supervisor, SupervisorConfig};
//!
//! struct Scheduler;
//!
//! #[async_trait]
//! impl Service for Scheduler {
//!     fn name(&self) -> &str { "scheduler" }
//!     async fn start(&self, ctx: ServiceContext) -> Result<(), ServiceError> {
//!         let token = ctx.token();
//!         ctx.spawn("tick", async move {
//!             token.cancelled().await;
//!             Ok(())
//!         });
//!         Ok(())
//!     }
//!     async fn stop(&self) -> Result<(), ServiceError> { Ok(()) }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = SupervisorConfig {
//!         handle_os_signals: false,
//!         install_global_bus: false,
//!         ..SupervisorConfig::default()
//!     };
//!     let sup = Supervisor::builder(cfg).build();
//!     sup.register(Arc::new(Scheduler))?;
//!
//!     let stop = sup.shutdown_handle();
//!     tokio::spawn(async move { stop.request() });
//!
//!     sup.serve().await?;
//!     Ok(())
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::builder::SupervisorBuilder;
use super::registry::{Registry, ServiceFailure};
use super::shutdown::{self, ShutdownHandle};
use crate::bus::BusRef;
use crate::core::{StartupPolicy, SupervisorConfig};
use crate::error::{panic_info, BusError, ServiceError, SupervisorError};
use crate::events::{Event, EventKind, EventStream};
use crate::observers::{Observe, ObserverSet};
use crate::runtime;
use crate::services::{FailureReport, ServiceContext, ServiceRuntime, ServiceSpec, ServiceState};

const TARGET: &str = "switchboard::supervisor";

/// Owns the bus and the managed services; drives their lifecycle.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: BusRef,
    events: EventStream,
    registry: Mutex<Registry>,
    // Serializes start_services/restart/shutdown; never held by bus handlers.
    ops: tokio::sync::Mutex<()>,
    requested: CancellationToken,
    root: CancellationToken,
    background: TaskTracker,
    failures_tx: mpsc::UnboundedSender<FailureReport>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<FailureReport>>>,
    // Handed to the listener task by `initialize()`.
    observers: Mutex<Vec<Arc<dyn Observe>>>,
    initialized: AtomicBool,
    finished: AtomicBool,
}

impl Supervisor {
    /// Starts building a supervisor.
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        bus: BusRef,
        observers: Vec<Arc<dyn Observe>>,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            events: bus.events(),
            cfg,
            bus,
            registry: Mutex::new(Registry::default()),
            ops: tokio::sync::Mutex::new(()),
            requested: CancellationToken::new(),
            root: CancellationToken::new(),
            background: TaskTracker::new(),
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
            observers: Mutex::new(observers),
            initialized: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    /// The supervised bus.
    pub fn bus(&self) -> BusRef {
        Arc::clone(&self.bus)
    }

    /// Stream carrying both bus outcomes and service lifecycle events.
    pub fn events(&self) -> EventStream {
        self.events.clone()
    }

    /// Configuration this supervisor was built with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Handle that makes `run()` return.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.requested.clone())
    }

    /// Adds a service in the `created` state.
    pub fn register(&self, spec: impl Into<ServiceSpec>) -> Result<(), SupervisorError> {
        let spec = spec.into();
        let name = spec.name().to_string();
        self.registry.lock().register(spec)?;
        tracing::debug!(target: TARGET, service = %name, "service registered");
        Ok(())
    }

    /// Current state of every service, in registration order.
    pub fn states(&self) -> Vec<(String, ServiceState)> {
        self.registry.lock().states()
    }

    /// Current state of one service.
    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.registry.lock().state(name)
    }

    /// Every failure recorded so far, oldest first.
    pub fn failures(&self) -> Vec<ServiceFailure> {
        self.registry.lock().failures()
    }

    /// Starts the bus, installs it process-wide (if configured), and starts
    /// the observer listener and the failure monitor. Idempotent.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), SupervisorError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Subscribe before the bus starts so observers see BusStarted.
        self.spawn_observer_listener();

        match self.bus.start().await {
            Ok(()) | Err(BusError::AlreadyStarted) => {}
            Err(err) => {
                self.initialized.store(false, Ordering::Release);
                return Err(err.into());
            }
        }
        if self.cfg.install_global_bus {
            runtime::set_bus(Arc::clone(&self.bus));
        }

        self.spawn_monitor();
        tracing::info!(target: TARGET, services = self.registry.lock().len(), "supervisor initialized");
        Ok(())
    }

    /// Starts every `created` service in dependency order.
    ///
    /// Under [`StartupPolicy::Abort`] the first failure stops the sequence and
    /// is returned as [`SupervisorError::StartupAborted`]; services that are
    /// already running stay running until `shutdown()`. Under
    /// [`StartupPolicy::Continue`] failures are recorded and the sequence goes
    /// on; services whose dependencies are not running are marked `failed`
    /// without being started.
    pub async fn start_services(&self) -> Result<(), SupervisorError> {
        let _ops = self.ops.lock().await;
        let order = self.registry.lock().start_order()?;

        for name in order {
            let blocked = {
                let reg = self.registry.lock();
                let Some(entry) = reg.get(&name) else {
                    continue;
                };
                if entry.state != ServiceState::Created {
                    continue;
                }
                entry
                    .spec
                    .dependencies()
                    .iter()
                    .find(|d| reg.state(d) != Some(ServiceState::Running))
                    .cloned()
            };

            if let Some(dep) = blocked {
                let reason = format!("dependency {dep:?} is not running");
                match self.cfg.startup {
                    StartupPolicy::Abort => {
                        return Err(SupervisorError::StartupAborted {
                            service: name,
                            reason,
                        });
                    }
                    StartupPolicy::Continue => {
                        self.fail_unstarted(&name, reason)?;
                        continue;
                    }
                }
            }

            if let Err(err) = self.start_one(&name).await {
                match (self.cfg.startup, &err) {
                    (StartupPolicy::Continue, SupervisorError::StartupAborted { .. }) => continue,
                    _ => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Waits until a shutdown is requested through a [`ShutdownHandle`] or,
    /// when enabled, an OS termination signal arrives.
    pub async fn run(&self) {
        let signal = async {
            if !self.cfg.handle_os_signals {
                return std::future::pending::<&'static str>().await;
            }
            match shutdown::wait_for_shutdown_signal().await {
                Ok(()) => "os_signal",
                Err(err) => {
                    tracing::warn!(target: TARGET, error = %err, "cannot listen for OS signals");
                    std::future::pending::<&'static str>().await
                }
            }
        };

        let reason = tokio::select! {
            _ = self.requested.cancelled() => "requested",
            reason = signal => reason,
        };
        self.requested.cancel();

        tracing::info!(target: TARGET, reason, "shutdown requested");
        self.events
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
    }

    /// Stops every started service in reverse start order, then the bus.
    ///
    /// Each `stop()` gets the service's stop grace; a service that overruns it
    /// is abandoned (left `failed`) and shutdown moves on. The bus is stopped
    /// regardless, then [`SupervisorError::GraceExceeded`] lists the abandoned
    /// services. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let _ops = self.ops.lock().await;
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.requested.cancel();

        let order = self.stop_order();
        let mut stuck = Vec::new();
        for name in order.iter().rev() {
            if let Some(name) = self.stop_one(name).await {
                stuck.push(name);
            }
        }

        self.bus.stop().await;
        if self.cfg.install_global_bus {
            runtime::clear_bus();
        }

        self.root.cancel();
        self.background.close();
        self.background.wait().await;

        if stuck.is_empty() {
            tracing::info!(target: TARGET, "supervisor stopped");
            Ok(())
        } else {
            Err(SupervisorError::GraceExceeded {
                grace: self.cfg.stop_grace,
                stuck,
            })
        }
    }

    /// Stops `name` if it is running or failed, then starts it again.
    ///
    /// Its dependencies must be running.
    pub async fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        let _ops = self.ops.lock().await;
        self.restart_locked(name).await
    }

    /// `initialize → start_services → run → shutdown`.
    ///
    /// A startup failure still shuts down whatever was started before returning it.
    pub async fn serve(self: &Arc<Self>) -> Result<(), SupervisorError> {
        self.initialize().await?;
        if let Err(err) = self.start_services().await {
            tracing::error!(target: TARGET, error = %err, "startup failed; shutting down");
            if let Err(stop_err) = self.shutdown().await {
                tracing::warn!(target: TARGET, error = %stop_err, "shutdown after failed startup");
            }
            return Err(err);
        }
        self.run().await;
        self.shutdown().await
    }

    fn stop_order(&self) -> Vec<String> {
        let reg = self.registry.lock();
        reg.start_order()
            .unwrap_or_else(|_| reg.states().into_iter().map(|(n, _)| n).collect())
    }

    fn emit(&self, ev: Event) {
        self.events.publish(ev);
    }

    fn fail_unstarted(&self, name: &str, reason: String) -> Result<(), SupervisorError> {
        {
            let mut reg = self.registry.lock();
            reg.transition(name, ServiceState::Failed)?;
            reg.record_failure(name, ServiceError::Start(reason.clone()));
        }
        tracing::error!(target: TARGET, service = %name, %reason, "service not started");
        self.emit(Event::for_service(EventKind::ServiceFailed, name).with_reason(reason));
        Ok(())
    }

    async fn restart_locked(&self, name: &str) -> Result<(), SupervisorError> {
        let needs_stop = {
            let reg = self.registry.lock();
            let entry = reg
                .get(name)
                .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
            entry.runtime.is_some()
        };
        if needs_stop {
            self.stop_one(name).await;
        }

        let missing = {
            let reg = self.registry.lock();
            reg.get(name).and_then(|e| {
                e.spec
                    .dependencies()
                    .iter()
                    .find(|d| reg.state(d) != Some(ServiceState::Running))
                    .cloned()
            })
        };
        if let Some(dep) = missing {
            return Err(SupervisorError::StartupAborted {
                service: name.to_string(),
                reason: format!("dependency {dep:?} is not running"),
            });
        }
        self.start_one(name).await
    }

    /// Runs one `start()`. A service failure is returned as `StartupAborted`.
    async fn start_one(&self, name: &str) -> Result<(), SupervisorError> {
        let (service, ctx, generation) = {
            let mut reg = self.registry.lock();
            reg.transition(name, ServiceState::Starting)?;
            let entry = reg.get_mut(name)?;
            let rt = ServiceRuntime::new(entry.generation, &self.root);
            entry.runtime = Some(rt.clone());
            let ctx = ServiceContext::new(
                Arc::clone(&entry.name),
                Arc::clone(&self.bus),
                rt,
                self.failures_tx.clone(),
            );
            (Arc::clone(entry.spec.service()), ctx, entry.generation)
        };

        tracing::info!(target: TARGET, service = %name, generation, "starting service");
        self.emit(
            Event::for_service(EventKind::ServiceStarting, name)
                .with_attempt(u32::try_from(generation).unwrap_or(u32::MAX)),
        );

        let start = AssertUnwindSafe(service.start(ctx)).catch_unwind();
        let outcome = match self.cfg.start_timeout_opt() {
            Some(limit) => match tokio::time::timeout(limit, start).await {
                Ok(res) => res,
                Err(_) => Ok(Err(ServiceError::Start(format!(
                    "start timed out after {limit:?}"
                )))),
            },
            None => start.await,
        };
        let result = match outcome {
            Ok(res) => res,
            Err(payload) => Err(ServiceError::Start(format!(
                "start panicked: {}",
                panic_info(payload.as_ref())
            ))),
        };

        match result {
            Ok(()) => {
                self.registry
                    .lock()
                    .transition(name, ServiceState::Running)?;
                tracing::info!(target: TARGET, service = %name, "service running");
                self.emit(Event::for_service(EventKind::ServiceRunning, name));
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                {
                    let mut reg = self.registry.lock();
                    reg.transition(name, ServiceState::Failed)?;
                    reg.record_failure(name, err);
                }
                tracing::error!(target: TARGET, service = %name, %reason, "service failed to start");
                self.emit(
                    Event::for_service(EventKind::ServiceFailed, name).with_reason(reason.as_str()),
                );
                Err(SupervisorError::StartupAborted {
                    service: name.to_string(),
                    reason,
                })
            }
        }
    }

    /// Runs one `stop()` plus cancellation of the service's background work.
    /// Returns the name if the service had to be abandoned.
    async fn stop_one(&self, name: &str) -> Option<String> {
        let (service, rt, grace) = {
            let mut reg = self.registry.lock();
            let entry = reg.get(name)?;
            let rt = entry.runtime.clone()?;
            let grace = entry.spec.stop_grace().unwrap_or(self.cfg.stop_grace);
            let service = Arc::clone(entry.spec.service());
            if let Err(err) = reg.transition(name, ServiceState::Stopping) {
                tracing::warn!(target: TARGET, service = %name, error = %err, "cannot stop service");
                return None;
            }
            (service, rt, grace)
        };

        tracing::info!(target: TARGET, service = %name, ?grace, "stopping service");
        self.emit(Event::for_service(EventKind::ServiceStopping, name));

        let deadline = Instant::now() + grace;
        let stop = AssertUnwindSafe(service.stop()).catch_unwind();
        let (returned, stop_err) = match tokio::time::timeout(grace, stop).await {
            Ok(Ok(Ok(()))) => (true, None),
            Ok(Ok(Err(err))) => (true, Some(err)),
            Ok(Err(payload)) => (
                true,
                Some(ServiceError::Stop(format!(
                    "stop panicked: {}",
                    panic_info(payload.as_ref())
                ))),
            ),
            Err(_) => (false, None),
        };
        let drained = rt
            .wind_down(deadline.saturating_duration_since(Instant::now()))
            .await;

        let mut reg = self.registry.lock();
        if let Some(err) = stop_err {
            tracing::warn!(target: TARGET, service = %name, error = %err, "service stop reported an error");
            reg.record_failure(name, err);
        }
        if let Ok(entry) = reg.get_mut(name) {
            entry.runtime = None;
        }

        if returned && drained {
            let _ = reg.transition(name, ServiceState::Stopped);
            drop(reg);
            tracing::info!(target: TARGET, service = %name, "service stopped");
            self.emit(Event::for_service(EventKind::ServiceStopped, name));
            None
        } else {
            let _ = reg.transition(name, ServiceState::Failed);
            reg.record_failure(
                name,
                ServiceError::Stop(format!("abandoned after {grace:?}")),
            );
            drop(reg);
            tracing::error!(target: TARGET, service = %name, ?grace, "service did not stop in time; abandoned");
            self.emit(
                Event::for_service(EventKind::ServiceAbandoned, name)
                    .with_delay(grace)
                    .with_reason("stop grace exceeded"),
            );
            Some(name.to_string())
        }
    }

    /// Forwards the event stream to the observers until shutdown, then drains them.
    fn spawn_observer_listener(&self) {
        let observers = std::mem::take(&mut *self.observers.lock());
        if observers.is_empty() {
            return;
        }
        let set = ObserverSet::new(observers, self.events.clone());
        let mut rx = self.events.subscribe();
        let token = self.root.clone();

        self.background.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(target: TARGET, skipped = n, "observer listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        });
    }

    fn spawn_monitor(self: &Arc<Self>) {
        let Some(mut rx) = self.failures_rx.lock().take() else {
            return;
        };
        let me = Arc::clone(self);
        let token = self.root.clone();

        self.background.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    report = rx.recv() => match report {
                        Some(report) => me.on_failure(report),
                        None => break,
                    },
                }
            }
        });
    }

    /// Monitoring hook: a service's background work failed.
    fn on_failure(self: &Arc<Self>, report: FailureReport) {
        let name = report.service.to_string();
        let reason = report.error.to_string();

        let restart = {
            let mut reg = self.registry.lock();
            let Ok(entry) = reg.get_mut(&name) else {
                return;
            };
            if entry.generation != report.generation {
                tracing::debug!(target: TARGET, service = %name, "ignoring failure from a previous run");
                return;
            }
            if entry.state != ServiceState::Running {
                reg.record_failure(&name, report.error);
                return;
            }
            if reg.transition(&name, ServiceState::Failed).is_err() {
                return;
            }
            reg.record_failure(&name, report.error);

            let Ok(entry) = reg.get_mut(&name) else {
                return;
            };
            if self.cfg.restart.allows(entry.restarts) && !self.requested.is_cancelled() {
                entry.restarts += 1;
                Some(entry.restarts)
            } else {
                None
            }
        };

        tracing::error!(target: TARGET, service = %name, %reason, "service failed");
        self.emit(Event::for_service(EventKind::ServiceFailed, &name).with_reason(reason.as_str()));

        if let Some(n) = restart {
            self.schedule_restart(name, report.generation, n);
        }
    }

    fn schedule_restart(self: &Arc<Self>, name: String, generation: u64, n: u32) {
        let delay: Duration = self.cfg.restart_backoff.delay_for(n);
        tracing::warn!(target: TARGET, service = %name, restart = n, ?delay, "restart scheduled");
        self.emit(
            Event::for_service(EventKind::ServiceRestartScheduled, &name)
                .with_attempt(n)
                .with_delay(delay),
        );

        let me = Arc::clone(self);
        let token = self.root.clone();
        self.background.spawn(async move {
            let _ops = tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => tokio::select! {
                    _ = token.cancelled() => return,
                    guard = me.ops.lock() => guard,
                },
            };
            let current = {
                let reg = me.registry.lock();
                reg.get(&name).map(|e| (e.state, e.generation))
            };
            if current != Some((ServiceState::Failed, generation)) {
                return;
            }
            if let Err(err) = me.restart_locked(&name).await {
                tracing::error!(target: TARGET, service = %name, error = %err, "automatic restart failed");
            }
        });
    }
}
