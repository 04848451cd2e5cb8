//! In-memory daemon used by unit tests.

use std::collections::{HashMap, HashSet};
use std::future::pending;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use farmhand_core::ServiceName;

use crate::error::DaemonError;
use crate::launcher::DaemonLauncher;
use crate::protocol::{DaemonConnector, DaemonControl, ExitReply, StartReply};
use crate::supervisor::PassphraseSource;

#[derive(Debug, Default)]
pub struct FakeState {
    pub running: HashSet<String>,
    /// `Some(reason)` fails the start, `None` gives no reply.
    pub start_failures: HashMap<String, Option<String>>,
    pub locked: bool,
    pub passphrase: String,
    /// Connection attempts that report "nothing listening" before one succeeds.
    pub unreachable_for: u32,
    pub connects: u32,
    pub exit_delay: Option<Duration>,
    /// Keyring replies take this long, like a daemon across a socket.
    pub reply_delay: Option<Duration>,
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDaemon {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_running(self, services: &[&str]) -> Self {
        self.state()
            .running
            .extend(services.iter().map(|s| s.to_string()));
        self
    }

    pub fn locked_with(self, passphrase: &str) -> Self {
        {
            let mut state = self.state();
            state.locked = true;
            state.passphrase = passphrase.to_string();
        }
        self
    }

    pub fn unreachable_for(self, attempts: u32) -> Self {
        self.state().unreachable_for = attempts;
        self
    }

    pub fn with_reply_delay(self, delay: Duration) -> Self {
        self.state().reply_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn control(&self) -> FakeControl {
        FakeControl {
            daemon: self.clone(),
        }
    }
}

pub struct FakeControl {
    daemon: FakeDaemon,
}

impl FakeControl {
    async fn reply_latency(&self) {
        let delay = self.daemon.state().reply_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl DaemonControl for FakeControl {
    async fn is_running(&mut self, service: &ServiceName) -> Result<bool, DaemonError> {
        let mut state = self.daemon.state();
        state.calls.push(format!("is_running {service}"));
        Ok(state.running.contains(&service.0))
    }

    async fn start_service(
        &mut self,
        service: &ServiceName,
    ) -> Result<Option<StartReply>, DaemonError> {
        let mut state = self.daemon.state();
        state.calls.push(format!("start_service {service}"));
        match state.start_failures.get(&service.0).cloned() {
            Some(Some(reason)) => Ok(Some(StartReply {
                success: false,
                error: Some(reason),
            })),
            Some(None) => Ok(None),
            None => {
                state.running.insert(service.0.clone());
                Ok(Some(StartReply {
                    success: true,
                    error: None,
                }))
            }
        }
    }

    async fn is_keyring_locked(&mut self) -> Result<bool, DaemonError> {
        self.reply_latency().await;
        let mut state = self.daemon.state();
        state.calls.push("is_keyring_locked".to_string());
        Ok(state.locked)
    }

    async fn unlock_keyring(&mut self, passphrase: &str) -> Result<bool, DaemonError> {
        self.reply_latency().await;
        let mut state = self.daemon.state();
        state.calls.push(format!("unlock_keyring {passphrase}"));
        if state.passphrase == passphrase {
            state.locked = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn exit(&mut self) -> Result<ExitReply, DaemonError> {
        let delay = {
            let mut state = self.daemon.state();
            state.calls.push("exit".to_string());
            state.exit_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.daemon.state();
        let mut services_stopped: Vec<String> = state.running.drain().collect();
        services_stopped.sort();
        Ok(ExitReply {
            success: true,
            services_stopped,
        })
    }

    async fn close(&mut self) -> Result<(), DaemonError> {
        self.daemon.state().calls.push("close".to_string());
        Ok(())
    }
}

impl DaemonConnector for FakeDaemon {
    type Connection = FakeControl;

    async fn connect(&self) -> Result<Option<FakeControl>, DaemonError> {
        let mut state = self.state();
        state.connects += 1;
        if state.connects <= state.unreachable_for {
            return Ok(None);
        }
        Ok(Some(FakeControl {
            daemon: self.clone(),
        }))
    }

    fn describe(&self) -> String {
        "fake-daemon".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    launches: Arc<AtomicU32>,
}

impl FakeLauncher {
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl DaemonLauncher for FakeLauncher {
    async fn launch(&self) -> Result<(), DaemonError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Passphrase source with a fixed cache and prompt answer. A `None` prompt
/// never resolves, like an operator who walked away.
#[derive(Debug, Clone, Default)]
pub struct FakePassphrases {
    pub cached: Option<String>,
    pub prompted: Option<String>,
    prompts: Arc<AtomicU32>,
}

impl FakePassphrases {
    pub fn new(cached: Option<&str>, prompted: Option<&str>) -> Self {
        Self {
            cached: cached.map(str::to_string),
            prompted: prompted.map(str::to_string),
            prompts: Arc::default(),
        }
    }

    pub fn prompts(&self) -> u32 {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl PassphraseSource for FakePassphrases {
    fn cached(&self) -> Option<String> {
        self.cached.clone()
    }

    async fn prompt(&self) -> Result<String, DaemonError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        match &self.prompted {
            Some(passphrase) => Ok(passphrase.clone()),
            None => pending().await,
        }
    }
}
