use crate::domain::connection::{ConnectionConfig, DeviceDescriptor};
use crate::domain::error::SerialMonResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Low-level notification emitted by an open port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// Raw inbound bytes, not yet framed
    Data(Vec<u8>),
    /// Asynchronous I/O failure; the port may still close afterwards
    Error(String),
    /// The port is gone. Emitted at most once, always last.
    Closed,
}

/// One open OS-level serial connection.
///
/// Implementations must emit [`PortEvent::Closed`] on their event stream once
/// the connection ends, whether through [`PortHandle::close`] or because the
/// device went away.
#[async_trait]
pub trait PortHandle: Send + Sync {
    /// OS path the handle was opened on
    fn path(&self) -> &str;

    /// Write all bytes to the port
    async fn write(&self, data: &[u8]) -> std::io::Result<()>;

    /// Close the port. Closing twice is not an error.
    async fn close(&self) -> std::io::Result<()>;
}

/// A freshly opened handle together with its event stream
pub struct OpenedPort {
    pub handle: Arc<dyn PortHandle>,
    pub events: mpsc::UnboundedReceiver<PortEvent>,
}

impl OpenedPort {
    pub fn new(handle: Arc<dyn PortHandle>, events: mpsc::UnboundedReceiver<PortEvent>) -> Self {
        Self { handle, events }
    }
}

/// Opens ports and enumerates devices
#[async_trait]
pub trait PortDriver: Send + Sync {
    /// Open a port with the given line settings
    async fn open(&self, config: &ConnectionConfig) -> SerialMonResult<OpenedPort>;

    /// List devices currently available on the host
    async fn list(&self) -> SerialMonResult<Vec<DeviceDescriptor>>;
}
