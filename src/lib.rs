//! SerialMon Library
//!
//! Serial port connection management with line framing, per-device event
//! subscriptions and automatic reconnect after unexpected disconnects.

pub mod api;
pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::connection::{ConnectionManager, ConnectionState, ConnectionStatus, ReconnectPolicy};
pub use crate::core::events::{ConnectionEvent, EventBus, Subscription};
pub use domain::config::AppConfig;
pub use domain::connection::{ConnectionConfig, ConnectionKey, DeviceDescriptor};
pub use domain::error::{SerialMonError, SerialMonResult};
