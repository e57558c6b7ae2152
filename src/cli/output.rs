use crate::cli::args::{DisplayMode, OutputFormat};
use crate::core::events::ConnectionEvent;
use crate::domain::config::{AppConfig, DeviceProfile};
use crate::domain::connection::DeviceDescriptor;
use base64::Engine;
use chrono::{DateTime, Local};
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[DeviceDescriptor]) -> Result<(), OutputError>;
    fn write_config(&self, config: &AppConfig) -> Result<(), OutputError>;
    fn write_devices(&self, devices: &[DeviceProfile]) -> Result<(), OutputError>;
    fn write_event(&self, event: &ConnectionEvent, display: DisplayMode) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::SerialMonError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[DeviceDescriptor]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    println!("No serial devices found");
                }
                for port in ports {
                    println!("Port: {} ({})", port.path, port.port_type);
                    println!("  Key: {}", port.key());
                    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                        println!("  USB: {:04x}:{:04x}", vid, pid);
                    }
                    if let Some(manufacturer) = &port.manufacturer {
                        println!("  Manufacturer: {}", manufacturer);
                    }
                    if let Some(serial) = &port.serial_number {
                        println!("  Serial number: {}", serial);
                    }
                    println!();
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(ports)?);
            }
            OutputFormat::Table => {
                if !ports.is_empty() {
                    let rows: Vec<PortTableRow> = ports.iter().map(PortTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
            OutputFormat::Csv => {
                println!("path,key,type,vid,pid,manufacturer,serial_number");
                for port in ports {
                    let row = PortTableRow::from(port);
                    println!(
                        "{},{},{},{},{},{},{}",
                        row.path, row.key, row.r#type, row.vid, row.pid, row.manufacturer, row.serial
                    );
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &AppConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("SerialMon Configuration:");
                println!("  Log level: {}", config.global.log_level);
                println!("  Reconnect delay: {}ms", config.global.reconnect_delay_ms);
                println!("  Max retry: {}", config.global.max_retry);
                println!("  Default baud rate: {}", config.global.default_baud_rate);

                if !config.devices.is_empty() {
                    println!("  Devices:");
                    for device in &config.devices {
                        println!("    {}: {}", device.name, describe_profile(device));
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            OutputFormat::Table | OutputFormat::Csv => self.write_devices(&config.devices)?,
        }
        Ok(())
    }

    fn write_devices(&self, devices: &[DeviceProfile]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                for device in devices {
                    println!("Device: {}", device.name);
                    println!("  Description: {}", describe_profile(device));
                    println!("  Path: {} @ {} baud", device.path, device.baud_rate);
                    if let Some(location_id) = &device.location_id {
                        println!("  Location id: {}", location_id);
                    }
                    println!();
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(devices)?);
            }
            OutputFormat::Table => {
                if !devices.is_empty() {
                    let rows: Vec<DeviceTableRow> = devices.iter().map(DeviceTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
            OutputFormat::Csv => {
                println!("name,description,path,baud_rate");
                for device in devices {
                    println!("{},{},{},{}", device.name, device.description, device.path, device.baud_rate);
                }
            }
        }
        Ok(())
    }

    fn write_event(&self, event: &ConnectionEvent, display: DisplayMode) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
            _ => match event {
                ConnectionEvent::Data { line, .. } => {
                    println!("{}", timestamped(&Local::now(), &render_line(line, display)))
                }
                ConnectionEvent::Error { key, message } => eprintln!("[{}] error: {}", key, message),
                ConnectionEvent::Closed { key, retry: true } => {
                    eprintln!("[{}] connection lost, reconnecting", key)
                }
                ConnectionEvent::Closed { key, retry: false } => eprintln!("[{}] closed", key),
            },
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// Render a received line in the requested byte display mode
pub fn render_line(line: &str, display: DisplayMode) -> String {
    match display {
        DisplayMode::Text => line.to_string(),
        DisplayMode::Hex => hex::encode(line.as_bytes()),
        DisplayMode::Base64 => base64::engine::general_purpose::STANDARD.encode(line.as_bytes()),
    }
}

/// Prefix a rendered line with its local receive time
pub fn timestamped(received_at: &DateTime<Local>, rendered: &str) -> String {
    format!("[{}]: {}", received_at.format("%H:%M:%S%.3f"), rendered)
}

fn describe_profile(device: &DeviceProfile) -> &str {
    if device.description.is_empty() {
        "No description"
    } else {
        &device.description
    }
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

/// Table row for an available port
#[derive(Tabled)]
struct PortTableRow {
    path: String,
    key: String,
    #[tabled(rename = "type")]
    r#type: String,
    vid: String,
    pid: String,
    manufacturer: String,
    serial: String,
}

impl From<&DeviceDescriptor> for PortTableRow {
    fn from(port: &DeviceDescriptor) -> Self {
        Self {
            path: port.path.clone(),
            key: port.key().to_string(),
            r#type: port.port_type.to_string(),
            vid: or_dash(port.vid.map(|vid| format!("{:04x}", vid))),
            pid: or_dash(port.pid.map(|pid| format!("{:04x}", pid))),
            manufacturer: or_dash(port.manufacturer.clone()),
            serial: or_dash(port.serial_number.clone()),
        }
    }
}

/// Table row for a saved device profile
#[derive(Tabled)]
struct DeviceTableRow {
    name: String,
    description: String,
    path: String,
    baud: u32,
}

impl From<&DeviceProfile> for DeviceTableRow {
    fn from(device: &DeviceProfile) -> Self {
        Self {
            name: device.name.clone(),
            description: device.description.clone(),
            path: device.path.clone(),
            baud: device.baud_rate,
        }
    }
}
