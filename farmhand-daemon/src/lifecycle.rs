//! Lifecycle state machine and signal-driven shutdown.
//!
//! Signals never do work themselves: a [`ShutdownTrigger`] task forwards each
//! one as a [`StopReason`] on an mpsc channel, and the [`Controller`] runs the
//! teardown on its own task when it reads the first one.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use farmhand_core::ServiceName;

use crate::error::DaemonError;
use crate::launcher::DaemonLauncher;
use crate::protocol::{DaemonConnector, DaemonControl};
use crate::relay::RelayHandle;
use crate::services::{start_all, ServiceStartResult};
use crate::supervisor::{
    ensure_running_and_unlocked, request_exit, DaemonHandle, PassphraseSource, RetryPolicy,
};

/// Default bound on waiting for the daemon to confirm it exited.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const STOP_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    StoppingRequested,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, StoppingRequested)
                | (StoppingRequested, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
    CtrlC,
    /// Asked for programmatically, e.g. by a test or an embedding caller.
    Requested,
}

/// Source of stop requests. Each call waits for the next one.
pub trait ShutdownTrigger: Send + 'static {
    fn next(&mut self) -> impl Future<Output = Result<StopReason, DaemonError>> + Send;
}

/// SIGINT and SIGTERM.
#[cfg(unix)]
pub struct UnixSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl UnixSignals {
    /// Install the handlers. Must be called from inside a runtime.
    pub fn install() -> Result<Self, DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| DaemonError::Signal(format!("failed to install SIGINT handler: {e}")))?;
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| DaemonError::Signal(format!("failed to install SIGTERM handler: {e}")))?;
        Ok(Self {
            interrupt,
            terminate,
        })
    }
}

#[cfg(unix)]
impl ShutdownTrigger for UnixSignals {
    async fn next(&mut self) -> Result<StopReason, DaemonError> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Ok(StopReason::Interrupt),
            Some(()) = self.terminate.recv() => Ok(StopReason::Terminate),
            else => Err(DaemonError::Signal("signal streams closed".to_string())),
        }
    }
}

/// Console Ctrl+C, for platforms without unix signals.
#[derive(Debug, Default)]
pub struct CtrlC;

impl ShutdownTrigger for CtrlC {
    async fn next(&mut self) -> Result<StopReason, DaemonError> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| DaemonError::Signal(format!("failed to listen for Ctrl+C: {e}")))?;
        Ok(StopReason::CtrlC)
    }
}

/// The trigger selected for the running platform.
pub enum PlatformTrigger {
    #[cfg(unix)]
    Unix(UnixSignals),
    CtrlC(CtrlC),
}

impl ShutdownTrigger for PlatformTrigger {
    async fn next(&mut self) -> Result<StopReason, DaemonError> {
        match self {
            #[cfg(unix)]
            PlatformTrigger::Unix(signals) => signals.next().await,
            PlatformTrigger::CtrlC(ctrl_c) => ctrl_c.next().await,
        }
    }
}

#[cfg(unix)]
pub fn platform_trigger() -> Result<PlatformTrigger, DaemonError> {
    UnixSignals::install().map(PlatformTrigger::Unix)
}

#[cfg(not(unix))]
pub fn platform_trigger() -> Result<PlatformTrigger, DaemonError> {
    Ok(PlatformTrigger::CtrlC(CtrlC))
}

/// Forward every stop request from `trigger` to `stop_tx` until either side
/// goes away.
pub fn spawn_shutdown_trigger<T: ShutdownTrigger>(
    mut trigger: T,
    stop_tx: mpsc::Sender<StopReason>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match trigger.next().await {
                Ok(reason) => {
                    tracing::info!(?reason, "stop signal received");
                    if stop_tx.send(reason).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "shutdown trigger failed");
                    break;
                }
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub services: Vec<ServiceName>,
    pub retry: RetryPolicy,
    pub shutdown_timeout: Duration,
}

impl ControllerOptions {
    pub fn new(services: Vec<ServiceName>) -> Self {
        Self {
            services,
            retry: RetryPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started: Vec<ServiceStartResult>,
    pub started_by_us: bool,
    pub shutdown_timed_out: bool,
}

pub struct Controller<D, L, P> {
    connector: D,
    launcher: L,
    passphrases: P,
    options: ControllerOptions,
    relay: Option<RelayHandle>,
    state: LifecycleState,
    history: Vec<LifecycleState>,
    stop_rx: mpsc::Receiver<StopReason>,
}

impl<D, L, P> Controller<D, L, P>
where
    D: DaemonConnector,
    L: DaemonLauncher,
    P: PassphraseSource,
{
    /// Build an idle controller and the sender that requests its stop.
    pub fn new(
        connector: D,
        launcher: L,
        passphrases: P,
        options: ControllerOptions,
    ) -> (Self, mpsc::Sender<StopReason>) {
        let (stop_tx, stop_rx) = mpsc::channel(STOP_CHANNEL_CAPACITY);
        let controller = Self {
            connector,
            launcher,
            passphrases,
            options,
            relay: None,
            state: LifecycleState::Idle,
            history: vec![LifecycleState::Idle],
            stop_rx,
        };
        (controller, stop_tx)
    }

    /// Relay stopped as the last step of shutdown.
    pub fn with_relay(mut self, relay: RelayHandle) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Start the daemon and services, wait for a stop request, shut down.
    pub async fn run(&mut self) -> Result<RunSummary, DaemonError> {
        self.transition(LifecycleState::Starting)?;

        let supervised = ensure_running_and_unlocked(
            &self.connector,
            &self.launcher,
            &self.passphrases,
            self.options.retry,
            &mut self.stop_rx,
        )
        .await;
        let mut handle = match supervised {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(error = %err, "daemon start failed");
                self.stop_relay().await;
                self.transition(LifecycleState::Stopped)?;
                return Err(err);
            }
        };

        let started = start_all(&mut handle.connection, &self.options.services).await;
        self.transition(LifecycleState::Running)?;
        tracing::info!(services = started.len(), "farmer running, waiting for stop signal");

        match self.stop_rx.recv().await {
            Some(reason) => tracing::info!(?reason, "stopping"),
            None => tracing::warn!("stop channel closed, stopping"),
        }
        self.transition(LifecycleState::StoppingRequested)?;
        self.transition(LifecycleState::ShuttingDown)?;

        let shutdown_timed_out = self.teardown(&mut handle).await;
        while let Ok(reason) = self.stop_rx.try_recv() {
            tracing::debug!(?reason, "already shutting down, ignoring stop request");
        }
        self.transition(LifecycleState::Stopped)?;

        Ok(RunSummary {
            started,
            started_by_us: handle.started_by_us,
            shutdown_timed_out,
        })
    }

    /// Returns whether the daemon's exit confirmation timed out.
    async fn teardown<C: DaemonControl>(&mut self, handle: &mut DaemonHandle<C>) -> bool {
        let mut timed_out = false;
        if handle.started_by_us {
            match request_exit(&mut handle.connection, self.options.shutdown_timeout).await {
                Ok(reply) => tracing::info!(
                    success = reply.success,
                    stopped = ?reply.services_stopped,
                    "daemon exited"
                ),
                Err(err @ DaemonError::ShutdownTimedOut(_)) => {
                    tracing::warn!(error = %err, "continuing shutdown");
                    timed_out = true;
                }
                Err(err) => tracing::warn!(error = %err, "daemon exit request failed"),
            }
        } else {
            tracing::info!("leaving externally started daemon running");
        }

        if let Err(err) = handle.connection.close().await {
            tracing::debug!(error = %err, "closing daemon connection failed");
        }
        self.stop_relay().await;
        timed_out
    }

    async fn stop_relay(&mut self) {
        let Some(relay) = self.relay.as_mut() else {
            return;
        };
        match relay.stop().await {
            Ok(Some(registry)) => tracing::debug!(services = registry.len(), "syslog relay stopped"),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "syslog relay did not stop cleanly"),
        }
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), DaemonError> {
        if !self.state.can_transition_to(next) {
            return Err(DaemonError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}
