use crate::domain::connection::{
    default_baud_rate, default_data_bits, default_stop_bits, ConnectionConfig, ConnectionKey,
    FlowControlConfig, ParityConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SerialMon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Saved device profiles
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Fixed delay between reconnect attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Consecutive failed reconnect attempts before giving up
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Baud rate used when none is given
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,
}

/// A saved serial device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Profile name
    pub name: String,
    /// Profile description
    #[serde(default)]
    pub description: String,
    /// OS device path
    pub path: String,
    /// Hardware location identifier, used as the connection key when set
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
}

impl DeviceProfile {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            key: ConnectionKey::from_parts(&self.path, self.location_id.as_deref()),
            path: self.path.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
        }
    }
}

impl AppConfig {
    pub fn find_device(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|device| device.name == name)
    }
}

impl GlobalConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_max_retry() -> u32 {
    10
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_retry: default_max_retry(),
            default_baud_rate: default_baud_rate(),
        }
    }
}
