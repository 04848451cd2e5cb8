//! Runtime side of farmhand: syslog relay, daemon control client and the
//! lifecycle controller that ties them together.

mod error;
pub mod launcher;
pub mod lifecycle;
pub mod log_rotation;
pub mod logging;
pub mod protocol;
pub mod relay;
mod runtime;
pub mod services;
pub mod supervisor;
pub mod syslog;

#[cfg(test)]
mod testing;

pub use error::DaemonError;
pub use lifecycle::{Controller, ControllerOptions, LifecycleState, RunSummary, StopReason};
pub use protocol::{DaemonConnection, DaemonConnector, DaemonControl, WebSocketConnector};
pub use relay::{serve as serve_relay, HandlerRegistry, RelayHandle, RelayService};
pub use runtime::{run, start_blocking, RunOptions};
pub use services::{start_all, ServiceStartOutcome, ServiceStartResult};
pub use syslog::{parse as parse_syslog, LogRecord, ParseError};
