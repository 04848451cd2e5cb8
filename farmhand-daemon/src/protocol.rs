use std::future::Future;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use farmhand_core::{DaemonEndpoint, DaemonTlsFiles, ServiceName};

use crate::error::{io_err, DaemonError};

/// Name the daemon's certificate is issued for, whatever host it listens on.
pub const TLS_SERVER_NAME: &str = "chia.net";

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(0);

/// One JSON frame on the control socket, in either direction.
///
/// A reply repeats the request's `request_id` with `ack` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonMessage {
    pub command: String,
    #[serde(default)]
    pub ack: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub origin: String,
}

impl DaemonMessage {
    /// A client request addressed to the daemon, with a fresh `request_id`.
    pub fn request(command: impl Into<String>, data: Value) -> Self {
        Self {
            command: command.into(),
            ack: false,
            data,
            request_id: next_request_id(),
            destination: "daemon".to_string(),
            origin: "client".to_string(),
        }
    }

    /// The daemon's acknowledgement of `self`.
    pub fn reply(&self, data: Value) -> Self {
        Self {
            command: self.command.clone(),
            ack: true,
            data,
            request_id: self.request_id.clone(),
            destination: self.origin.clone(),
            origin: self.destination.clone(),
        }
    }
}

fn next_request_id() -> String {
    let seq = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
    format!("{:08x}{seq:016x}", std::process::id())
}

/// Reply to `start_service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReply {
    pub success: bool,
    pub error: Option<String>,
}

/// Reply to `exit`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitReply {
    pub success: bool,
    pub services_stopped: Vec<String>,
}

/// Control operations the wrapper needs from the daemon.
///
/// `start_service` returns `Ok(None)` when the daemon gave no usable reply.
#[trait_variant::make(DaemonControl: Send)]
pub trait LocalDaemonControl {
    async fn is_running(&mut self, service: &ServiceName) -> Result<bool, DaemonError>;

    async fn start_service(
        &mut self,
        service: &ServiceName,
    ) -> Result<Option<StartReply>, DaemonError>;

    async fn is_keyring_locked(&mut self) -> Result<bool, DaemonError>;

    /// `Ok(false)` when the daemon rejected the passphrase.
    async fn unlock_keyring(&mut self, passphrase: &str) -> Result<bool, DaemonError>;

    async fn exit(&mut self) -> Result<ExitReply, DaemonError>;

    async fn close(&mut self) -> Result<(), DaemonError>;
}

/// Opens control connections; `Ok(None)` means nothing is listening.
pub trait DaemonConnector: Send + Sync {
    type Connection: DaemonControl + Send;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<Option<Self::Connection>, DaemonError>> + Send;

    /// Human-readable target, for errors and logs.
    fn describe(&self) -> String;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket control connection, TLS with a client certificate when the
/// daemon config names one.
pub struct DaemonConnection {
    endpoint: DaemonEndpoint,
    socket: Socket,
}

impl DaemonConnection {
    /// Connect to `endpoint` and check that a daemon answers `ping`.
    ///
    /// `Ok(None)` when nothing usable is there: the port is closed, a
    /// certificate file is missing, the handshake fails or the peer does not
    /// answer `ping`. Unreadable or malformed certificates are errors.
    pub async fn connect(
        endpoint: &DaemonEndpoint,
        tls: Option<&DaemonTlsFiles>,
    ) -> Result<Option<Self>, DaemonError> {
        let tls_config = match tls.map(client_config).transpose() {
            Ok(config) => config,
            Err(DaemonError::Io { path, source }) if source.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "daemon certificate missing");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let tcp = match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
            Ok(stream) => stream,
            Err(err) if is_unreachable(&err) => {
                tracing::debug!(%endpoint, error = %err, "daemon not reachable");
                return Ok(None);
            }
            Err(err) => return Err(io_err(endpoint.to_string(), err)),
        };

        let (url, stream) = match tls_config {
            Some(config) => {
                let name = ServerName::try_from(TLS_SERVER_NAME)
                    .map_err(|e| DaemonError::Tls(e.to_string()))?;
                match TlsConnector::from(config).connect(name, tcp).await {
                    Ok(stream) => (
                        format!("wss://{}:{}", endpoint.host, endpoint.port),
                        MaybeTlsStream::Rustls(stream),
                    ),
                    Err(err) => {
                        tracing::debug!(%endpoint, error = %err, "TLS handshake with daemon failed");
                        return Ok(None);
                    }
                }
            }
            None => (
                format!("ws://{}:{}", endpoint.host, endpoint.port),
                MaybeTlsStream::Plain(tcp),
            ),
        };

        let socket = match tokio_tungstenite::client_async(url, stream).await {
            Ok((socket, _response)) => socket,
            Err(err) => {
                tracing::debug!(%endpoint, error = %err, "WebSocket handshake with daemon failed");
                return Ok(None);
            }
        };

        let mut connection = Self {
            endpoint: endpoint.clone(),
            socket,
        };
        match connection.ping().await {
            Ok(true) => Ok(Some(connection)),
            Ok(false) => {
                tracing::debug!(%endpoint, "peer did not answer ping");
                Ok(None)
            }
            Err(err) => {
                tracing::debug!(%endpoint, error = %err, "daemon validation failed");
                Ok(None)
            }
        }
    }

    pub fn endpoint(&self) -> &DaemonEndpoint {
        &self.endpoint
    }

    /// Send one request and wait for the frame acknowledging it. Frames for
    /// other requests are skipped. Returns the reply's `data`.
    pub async fn request(&mut self, command: &str, data: Value) -> Result<Value, DaemonError> {
        let request = DaemonMessage::request(command, data);
        let payload = serde_json::to_string(&request)?;
        self.socket.send(Message::Text(payload.into())).await?;

        while let Some(frame) = self.socket.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let reply: DaemonMessage = serde_json::from_str(&text)?;
            if reply.request_id == request.request_id {
                return Ok(reply.data);
            }
            tracing::trace!(command = %reply.command, "skipping unrelated daemon message");
        }
        Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ))
    }

    async fn command(&mut self, command: &str, data: Value) -> Result<Value, DaemonError> {
        let data = self.request(command, data).await?;
        check_success(data)
    }

    async fn ping(&mut self) -> Result<bool, DaemonError> {
        let data = self.command("ping", json!({})).await?;
        Ok(data.get("value").and_then(Value::as_str) == Some("pong"))
    }
}

impl DaemonControl for DaemonConnection {
    async fn is_running(&mut self, service: &ServiceName) -> Result<bool, DaemonError> {
        let data = self
            .command("is_running", json!({ "service": service.0 }))
            .await?;
        Ok(data
            .get("is_running")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn start_service(
        &mut self,
        service: &ServiceName,
    ) -> Result<Option<StartReply>, DaemonError> {
        let data = self
            .request("start_service", json!({ "service": service.0 }))
            .await?;
        Ok(parse_start_reply(&data))
    }

    async fn is_keyring_locked(&mut self) -> Result<bool, DaemonError> {
        let data = self.command("is_keyring_locked", json!({})).await?;
        Ok(data
            .get("is_keyring_locked")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn unlock_keyring(&mut self, passphrase: &str) -> Result<bool, DaemonError> {
        let data = self
            .request("unlock_keyring", json!({ "key": passphrase }))
            .await?;
        Ok(succeeded(&data))
    }

    async fn exit(&mut self) -> Result<ExitReply, DaemonError> {
        let data = self.request("exit", json!({})).await?;
        Ok(parse_exit_reply(&data))
    }

    async fn close(&mut self) -> Result<(), DaemonError> {
        match self.socket.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(tungstenite::Error::Io(err))
                if is_unreachable(&err) || err.kind() == ErrorKind::NotConnected =>
            {
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Connects to a fixed endpoint, over TLS when certificate files are given.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: DaemonEndpoint,
    tls: Option<DaemonTlsFiles>,
}

impl WebSocketConnector {
    pub fn new(endpoint: DaemonEndpoint, tls: Option<DaemonTlsFiles>) -> Self {
        Self { endpoint, tls }
    }
}

impl DaemonConnector for WebSocketConnector {
    type Connection = DaemonConnection;

    async fn connect(&self) -> Result<Option<DaemonConnection>, DaemonError> {
        DaemonConnection::connect(&self.endpoint, self.tls.as_ref()).await
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Trust only the install's private CA and present the daemon certificate.
fn client_config(files: &DaemonTlsFiles) -> Result<Arc<ClientConfig>, DaemonError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&files.ca_cert)? {
        roots
            .add(cert)
            .map_err(|e| DaemonError::Tls(format!("{}: {e}", files.ca_cert.display())))?;
    }
    let certs = read_certs(&files.cert)?;
    let key = read_key(&files.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .and_then(|builder| {
            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(certs, key)
        })
        .map_err(|e| DaemonError::Tls(e.to_string()))?;
    Ok(Arc::new(config))
}

fn open_pem(path: &Path) -> Result<BufReader<std::fs::File>, DaemonError> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|e| io_err(path, e))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, DaemonError> {
    let certs = rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io_err(path, e))?;
    if certs.is_empty() {
        return Err(DaemonError::Tls(format!(
            "no certificate in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, DaemonError> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|e| io_err(path, e))?
        .ok_or_else(|| DaemonError::Tls(format!("no private key in {}", path.display())))
}

fn is_unreachable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

fn succeeded(data: &Value) -> bool {
    data.get("success").and_then(Value::as_bool).unwrap_or(false)
}

/// A reply with `success: false` fails the command with the daemon's error.
fn check_success(data: Value) -> Result<Value, DaemonError> {
    if data.get("success").and_then(Value::as_bool) == Some(false) {
        let error = data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown daemon error");
        return Err(DaemonError::Protocol(error.to_string()));
    }
    Ok(data)
}

/// An empty or non-object reply means the daemon gave no answer.
fn parse_start_reply(data: &Value) -> Option<StartReply> {
    let fields = data.as_object().filter(|fields| !fields.is_empty())?;
    Some(StartReply {
        success: succeeded(data),
        error: fields
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_exit_reply(data: &Value) -> ExitReply {
    let services_stopped = data
        .get("services_stopped")
        .and_then(Value::as_array)
        .map(|services| {
            services
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    ExitReply {
        success: succeeded(data),
        services_stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_addressed_to_daemon() {
        let first = DaemonMessage::request("exit", json!({}));
        let second = DaemonMessage::request("exit", json!({}));
        let encoded: Value = serde_json::to_value(&first).unwrap();

        assert_eq!(encoded["command"], "exit");
        assert_eq!(encoded["ack"], false);
        assert_eq!(encoded["destination"], "daemon");
        assert_eq!(encoded["origin"], "client");
        assert_eq!(encoded["data"], json!({}));
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn reply_echoes_request_id() {
        let request = DaemonMessage::request("ping", json!({}));
        let reply = request.reply(json!({"success": true, "value": "pong"}));
        assert!(reply.ack);
        assert_eq!(reply.request_id, request.request_id);
        assert_eq!(reply.destination, "client");
        assert_eq!(reply.origin, "daemon");
    }

    #[test]
    fn frames_without_envelope_fields_still_decode() {
        let message: DaemonMessage =
            serde_json::from_str(r#"{"command":"state_changed","data":{}}"#).unwrap();
        assert!(message.request_id.is_empty());
        assert!(!message.ack);
    }

    #[test]
    fn start_reply_reads_error() {
        let reply = parse_start_reply(&json!({"success": false, "error": "plots missing"}))
            .expect("reply");
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("plots missing"));
    }

    #[test]
    fn empty_start_reply_is_no_response() {
        assert_eq!(parse_start_reply(&json!({})), None);
        assert_eq!(parse_start_reply(&Value::Null), None);
    }

    #[test]
    fn exit_reply_lists_stopped_services() {
        let reply = parse_exit_reply(&json!({
            "success": true,
            "services_stopped": ["chia_farmer", "chia_harvester"],
        }));
        assert!(reply.success);
        assert_eq!(reply.services_stopped, ["chia_farmer", "chia_harvester"]);
    }

    #[test]
    fn failed_command_maps_to_protocol_error() {
        let err = check_success(json!({"success": false, "error": "boom"})).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg == "boom"));
        assert!(check_success(json!({"is_running": true})).is_ok());
    }

    #[tokio::test]
    async fn missing_certificates_mean_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let files = DaemonTlsFiles {
            ca_cert: dir.path().join("ca.crt"),
            cert: dir.path().join("daemon.crt"),
            key: dir.path().join("daemon.key"),
        };
        let endpoint = DaemonEndpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
        };
        let connection = DaemonConnection::connect(&endpoint, Some(&files))
            .await
            .unwrap();
        assert!(connection.is_none());
    }

    #[tokio::test]
    async fn garbage_certificate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("ca.crt");
        std::fs::write(&garbage, "not a certificate").unwrap();
        let files = DaemonTlsFiles {
            ca_cert: garbage.clone(),
            cert: garbage.clone(),
            key: garbage,
        };
        let endpoint = DaemonEndpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
        };
        let err = DaemonConnection::connect(&endpoint, Some(&files))
            .await
            .err()
            .expect("error");
        assert!(matches!(err, DaemonError::Tls(_)), "{err}");
    }
}
