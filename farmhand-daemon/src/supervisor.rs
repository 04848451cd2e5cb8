//! Attach to or start the daemon, then unlock its keyring.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::DaemonError;
use crate::launcher::DaemonLauncher;
use crate::lifecycle::StopReason;
use crate::protocol::{DaemonConnector, DaemonControl, ExitReply};

/// Environment variable holding a cached keyring passphrase.
pub const KEYRING_PASSPHRASE_ENV: &str = "FARMHAND_KEYRING_PASSPHRASE";

/// How long a daemon we started gets to exit when start-up is abandoned.
const ABANDON_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded reconnect schedule used after spawning the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl RetryPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

    /// Poll every [`Self::DEFAULT_INTERVAL`] for roughly `timeout`, at least once.
    pub fn from_timeout(timeout: Duration) -> Self {
        let steps = timeout.as_millis() / Self::DEFAULT_INTERVAL.as_millis();
        Self {
            interval: Self::DEFAULT_INTERVAL,
            attempts: u32::try_from(steps).unwrap_or(u32::MAX).max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_timeout(Duration::from_secs(30))
    }
}

/// Where keyring passphrases come from.
pub trait PassphraseSource: Send + Sync {
    /// A passphrase available without asking anyone.
    fn cached(&self) -> Option<String>;

    /// Ask the operator. May block for as long as the operator takes.
    fn prompt(&self) -> impl Future<Output = Result<String, DaemonError>> + Send;
}

/// Cached passphrase from the environment, otherwise a terminal prompt.
#[derive(Debug, Clone)]
pub struct TerminalPassphrase {
    env_var: String,
}

impl TerminalPassphrase {
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
        }
    }
}

impl Default for TerminalPassphrase {
    fn default() -> Self {
        Self::new(KEYRING_PASSPHRASE_ENV)
    }
}

impl PassphraseSource for TerminalPassphrase {
    fn cached(&self) -> Option<String> {
        std::env::var(&self.env_var).ok().filter(|p| !p.is_empty())
    }

    async fn prompt(&self) -> Result<String, DaemonError> {
        // rpassword turns echo off until it returns. If this future is dropped
        // first, the guard puts the terminal back.
        let _terminal = TerminalState::capture();
        // The prompt reads the terminal synchronously; keep it off the scheduler.
        tokio::task::spawn_blocking(|| rpassword::prompt_password("Keyring passphrase: "))
            .await
            .map_err(|err| DaemonError::Protocol(format!("passphrase prompt join failure: {err}")))?
            .map_err(|err| DaemonError::Keyring(format!("could not read passphrase: {err}")))
    }
}

/// Terminal attributes captured before a prompt, written back on drop.
#[cfg(unix)]
struct TerminalState {
    tty: std::fs::File,
    saved: nix::sys::termios::Termios,
}

#[cfg(unix)]
impl TerminalState {
    /// `None` without a controlling terminal.
    fn capture() -> Option<Self> {
        let tty = std::fs::File::open("/dev/tty").ok()?;
        let saved = nix::sys::termios::tcgetattr(&tty).ok()?;
        Some(Self { tty, saved })
    }
}

#[cfg(unix)]
impl Drop for TerminalState {
    fn drop(&mut self) {
        use nix::sys::termios::{tcsetattr, SetArg};
        if let Err(err) = tcsetattr(&self.tty, SetArg::TCSANOW, &self.saved) {
            tracing::debug!(error = %err, "could not restore terminal attributes");
        }
    }
}

#[cfg(not(unix))]
struct TerminalState;

#[cfg(not(unix))]
impl TerminalState {
    fn capture() -> Option<Self> {
        None
    }
}

/// A connected, unlocked daemon.
pub struct DaemonHandle<C> {
    pub connection: C,
    /// Whether this process spawned the daemon and therefore owns its shutdown.
    pub started_by_us: bool,
}

/// Connect to the daemon, starting it if nothing is listening, and make sure
/// its keyring is unlocked.
///
/// At most one daemon is spawned per call. A stop request that arrives while
/// the operator is being asked for the keyring passphrase abandons start-up;
/// a daemon spawned by this call is asked to exit first. Stop requests seen
/// at any other point are left in `stop_rx`.
pub async fn ensure_running_and_unlocked<D, L, P>(
    connector: &D,
    launcher: &L,
    passphrases: &P,
    policy: RetryPolicy,
    stop_rx: &mut mpsc::Receiver<StopReason>,
) -> Result<DaemonHandle<D::Connection>, DaemonError>
where
    D: DaemonConnector,
    L: DaemonLauncher,
    P: PassphraseSource,
{
    let (mut connection, started_by_us) = match connector.connect().await? {
        Some(connection) => {
            tracing::info!(daemon = %connector.describe(), "attached to running daemon");
            (connection, false)
        }
        None => {
            tracing::info!(daemon = %connector.describe(), "daemon not reachable, starting it");
            launcher.launch().await?;
            (poll_connect(connector, policy).await?, true)
        }
    };

    let failure = match unlock_keyring(&mut connection, passphrases, stop_rx).await {
        Ok(()) => {
            return Ok(DaemonHandle {
                connection,
                started_by_us,
            })
        }
        Err(err) => err,
    };

    if started_by_us {
        match request_exit(&mut connection, ABANDON_EXIT_TIMEOUT).await {
            Ok(reply) => tracing::info!(
                stopped = ?reply.services_stopped,
                "stopped daemon started by this process"
            ),
            Err(err) => tracing::warn!(error = %err, "could not stop daemon started by this process"),
        }
    }
    if let Err(err) = connection.close().await {
        tracing::debug!(error = %err, "closing daemon connection failed");
    }
    Err(failure)
}

/// Ask the daemon to exit, giving up after `timeout`.
pub async fn request_exit<C: DaemonControl>(
    connection: &mut C,
    timeout: Duration,
) -> Result<ExitReply, DaemonError> {
    tokio::time::timeout(timeout, connection.exit())
        .await
        .map_err(|_| DaemonError::ShutdownTimedOut(timeout))?
}

async fn poll_connect<D: DaemonConnector>(
    connector: &D,
    policy: RetryPolicy,
) -> Result<D::Connection, DaemonError> {
    for attempt in 1..=policy.attempts {
        if let Some(connection) = connector.connect().await? {
            tracing::info!(daemon = %connector.describe(), attempt, "connected to started daemon");
            return Ok(connection);
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(DaemonError::DaemonUnavailable {
        endpoint: connector.describe(),
        attempts: policy.attempts,
    })
}

async fn unlock_keyring<C, P>(
    connection: &mut C,
    passphrases: &P,
    stop_rx: &mut mpsc::Receiver<StopReason>,
) -> Result<(), DaemonError>
where
    C: DaemonControl,
    P: PassphraseSource,
{
    if !connection.is_keyring_locked().await? {
        return Ok(());
    }
    if let Some(cached) = passphrases.cached() {
        if connection.unlock_keyring(&cached).await? {
            tracing::info!("keyring unlocked with cached passphrase");
            return Ok(());
        }
        tracing::warn!("cached keyring passphrase was rejected");
    }

    // Only the operator prompt can wait indefinitely; a stop cancels it. Any
    // stop that arrives before this point stays queued for the controller.
    let passphrase = tokio::select! {
        biased;
        passphrase = passphrases.prompt() => passphrase?,
        Some(reason) = stop_rx.recv() => {
            tracing::info!(?reason, "stop requested while waiting for keyring passphrase");
            return Err(DaemonError::Interrupted);
        }
    };
    if connection.unlock_keyring(&passphrase).await? {
        tracing::info!("keyring unlocked");
        Ok(())
    } else {
        Err(DaemonError::Keyring("passphrase rejected by daemon".to_string()))
    }
}
