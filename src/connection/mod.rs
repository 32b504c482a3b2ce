// Streaming connection lifecycle: connect, reconnect with backoff, teardown

mod manager;
mod policy;

pub use manager::ConnectionManager;
pub use policy::{Backoff, ConnectionConfig, ReconnectPolicy, DEFAULT_URL};

use serde_json::Value;
use std::fmt;

/// Lifecycle of the single streaming connection.
///
/// ```text
/// Disconnected --connect--> Connecting --open--> Connected
/// Connected --close--> Reconnecting --timer--> Connecting
/// Reconnecting --budget spent--> Failed
/// any --disconnect--> Disconnected
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retry budget exhausted; only an explicit `connect` leaves this state
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors published on the bus under [`crate::bus::Topic::Error`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Connection refused, network error, protocol error
    Transport(String),
    /// `{"type": "error"}` frame; `data` as sent by the server
    Server(Value),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "transport error: {}", e),
            ClientError::Server(data) => write!(f, "server error: {}", data),
        }
    }
}

impl std::error::Error for ClientError {}

/// Result of a best-effort `send`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Not connected, or the payload could not be encoded or written
    Dropped,
}
