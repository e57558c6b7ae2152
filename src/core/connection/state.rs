use crate::domain::connection::ConnectionKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one connection key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// An open attempt is in flight
    Connecting,
    /// A handle is registered and streaming
    Open,
    /// The connection dropped and the reconnect loop owns the key
    Reconnecting,
    /// Down, with no loop running
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Point-in-time view of a connection key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub key: ConnectionKey,
    pub path: String,
    pub baud_rate: u32,
    pub state: ConnectionState,
    pub retry_count: u32,
    /// The reconnect loop gave up; only a manual reconnect resumes it
    pub exhausted: bool,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state == ConnectionState::Reconnecting
    }
}
