//! UDP syslog relay.
//!
//! The daemon's services log to `syslog_host:syslog_port`; each datagram is
//! parsed and re-emitted through a per-service sink. Delivery is best effort:
//! nothing is acknowledged, retried or reordered.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{io_err, DaemonError};
use crate::syslog::{self, level_name, tracing_level, LogRecord};

/// Largest datagram the relay reads; longer payloads are truncated by the OS.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Output handler for one service.
pub trait LogSink: Send {
    fn emit(&mut self, record: &LogRecord);
}

/// Emits relayed records as tracing events under the `daemon` target.
#[derive(Debug)]
pub struct TracingSink {
    service: String,
}

impl TracingSink {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn emit(&mut self, record: &LogRecord) {
        let service = self.service.as_str();
        let severity = level_name(record.level);
        let message = record.message.as_str();
        // `tracing` macros need the level as a constant.
        match tracing_level(record.level) {
            tracing::Level::ERROR => {
                tracing::error!(target: "daemon", service, severity, "{message}")
            }
            tracing::Level::WARN => tracing::warn!(target: "daemon", service, severity, "{message}"),
            tracing::Level::INFO => tracing::info!(target: "daemon", service, severity, "{message}"),
            tracing::Level::DEBUG => {
                tracing::debug!(target: "daemon", service, severity, "{message}")
            }
            tracing::Level::TRACE => {
                tracing::trace!(target: "daemon", service, severity, "{message}")
            }
        }
    }
}

/// Builds the sink for a service the first time it is seen.
pub type SinkFactory = Box<dyn FnMut(&str) -> Box<dyn LogSink> + Send>;

/// Service name → attached sink. Owned by the relay task only.
pub struct HandlerRegistry {
    sinks: HashMap<String, Box<dyn LogSink>>,
    factory: SinkFactory,
}

impl HandlerRegistry {
    pub fn new(factory: SinkFactory) -> Self {
        Self {
            sinks: HashMap::new(),
            factory,
        }
    }

    /// Registry that emits through [`TracingSink`].
    pub fn tracing() -> Self {
        Self::new(Box::new(|service: &str| -> Box<dyn LogSink> {
            Box::new(TracingSink::new(service))
        }))
    }

    /// Route a record, attaching a sink for its service if none exists yet.
    pub fn dispatch(&mut self, record: &LogRecord) {
        if !self.sinks.contains_key(&record.service) {
            let sink = (self.factory)(&record.service);
            self.sinks.insert(record.service.clone(), sink);
        }
        if let Some(sink) = self.sinks.get_mut(&record.service) {
            sink.emit(record);
        }
    }

    pub fn has_handler(&self, service: &str) -> bool {
        self.sinks.contains_key(service)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// A bound relay socket, not yet receiving.
pub struct RelayService {
    socket: UdpSocket,
    local_addr: SocketAddr,
    registry: HandlerRegistry,
}

impl RelayService {
    /// Bind `host:port`. Port `0` picks a free port (see [`Self::local_addr`]).
    pub async fn bind(host: &str, port: u16, registry: HandlerRegistry) -> Result<Self, DaemonError> {
        let label = format!("udp://{host}:{port}");
        let socket = UdpSocket::bind((host, port))
            .await
            .map_err(|e| io_err(&label, e))?;
        let local_addr = socket.local_addr().map_err(|e| io_err(&label, e))?;
        tracing::debug!(addr = %local_addr, "syslog relay bound");
        Ok(Self {
            socket,
            local_addr,
            registry,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive until `shutdown` fires. The socket is dropped on return.
    pub async fn run(
        mut self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<HandlerRegistry, DaemonError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(err) => {
                            // ICMP port-unreachable surfaces here on some platforms.
                            tracing::debug!(error = %err, "syslog relay receive error");
                            continue;
                        }
                    };
                    handle_datagram(&mut self.registry, &buf[..len], peer);
                }
            }
        }
        tracing::debug!(addr = %self.local_addr, "syslog relay stopped");
        Ok(self.registry)
    }

    /// Spawn the receive loop on the current runtime.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let local_addr = self.local_addr;
        let join = tokio::spawn(self.run(shutdown_rx));
        RelayHandle {
            local_addr,
            shutdown_tx,
            join: Some(join),
        }
    }
}

fn handle_datagram(registry: &mut HandlerRegistry, bytes: &[u8], peer: SocketAddr) {
    let text = String::from_utf8_lossy(bytes);
    match syslog::parse(text.trim()) {
        Ok(record) => registry.dispatch(&record),
        Err(err) => {
            tracing::debug!(%peer, error = %err, "dropping malformed syslog datagram");
        }
    }
}

/// Handle to a spawned relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    join: Option<JoinHandle<Result<HandlerRegistry, DaemonError>>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancel the relay and wait for it to finish. Calling again is a no-op.
    pub async fn stop(&mut self) -> Result<Option<HandlerRegistry>, DaemonError> {
        let Some(join) = self.join.take() else {
            return Ok(None);
        };
        let _ = self.shutdown_tx.send(());
        let registry = join
            .await
            .map_err(|err| DaemonError::Protocol(format!("syslog relay join failure: {err}")))??;
        Ok(Some(registry))
    }
}

/// Bind `host:port` and relay into tracing until the returned handle is stopped.
pub async fn serve(host: &str, port: u16) -> Result<RelayHandle, DaemonError> {
    let relay = RelayService::bind(host, port, HandlerRegistry::tracing()).await?;
    Ok(relay.spawn())
}
