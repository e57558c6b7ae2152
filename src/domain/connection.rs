use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a physical device slot.
///
/// A hardware location identifier is preferred over the OS path because a path
/// can be handed to a different device after a replug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Location id when present and non-empty, otherwise the path.
    pub fn from_parts(path: &str, location_id: Option<&str>) -> Self {
        match location_id {
            Some(id) if !id.trim().is_empty() => Self(id.to_string()),
            _ => Self(path.to_string()),
        }
    }

    pub fn from_descriptor(descriptor: &DeviceDescriptor) -> Self {
        Self::from_parts(&descriptor.path, descriptor.location_id.as_deref())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ConnectionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Parity configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlConfig {
    #[default]
    None,
    Hardware,
    Software,
}

/// Everything needed to open (and later re-open) one serial connection.
///
/// Never mutated once an attempt has started; the reconnect loop keeps its own
/// copy and reuses it for every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub key: ConnectionKey,
    pub path: String,
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

impl ConnectionConfig {
    /// Config keyed by path with default line settings.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        let path = path.into();
        Self {
            key: ConnectionKey::new(path.clone()),
            path,
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: ParityConfig::None,
            flow_control: FlowControlConfig::None,
        }
    }

    pub fn from_descriptor(descriptor: &DeviceDescriptor, baud_rate: u32) -> Self {
        Self {
            key: ConnectionKey::from_descriptor(descriptor),
            ..Self::new(descriptor.path.clone(), baud_rate)
        }
    }

    pub fn with_key(mut self, key: impl Into<ConnectionKey>) -> Self {
        self.key = key.into();
        self
    }
}

/// Kind of port reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::Usb => write!(f, "usb"),
            PortType::Pci => write!(f, "pci"),
            PortType::Bluetooth => write!(f, "bluetooth"),
            PortType::Unknown => write!(f, "unknown"),
        }
    }
}

/// One entry of the available-devices listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub path: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub vid: Option<u16>,
    #[serde(default)]
    pub pid: Option<u16>,
    pub port_type: PortType,
}

impl DeviceDescriptor {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::from_descriptor(self)
    }
}

pub(crate) fn default_baud_rate() -> u32 {
    9600
}

pub(crate) fn default_data_bits() -> u8 {
    8
}

pub(crate) fn default_stop_bits() -> u8 {
    1
}
