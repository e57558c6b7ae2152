use crate::core::connection::port::{OpenedPort, PortDriver, PortEvent, PortHandle};
use crate::domain::connection::{
    ConnectionConfig, DeviceDescriptor, FlowControlConfig, ParityConfig, PortType,
};
use crate::domain::error::{SerialMonError, SerialMonResult};
use async_trait::async_trait;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Poll interval of the blocking reader; bounds how long `close` waits
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// [`PortDriver`] backed by the `serialport` crate
#[derive(Debug, Clone, Default)]
pub struct SerialPortDriver;

impl SerialPortDriver {
    pub fn new() -> Self {
        Self
    }
}

fn open_error(config: &ConnectionConfig, message: impl ToString) -> SerialMonError {
    SerialMonError::Open {
        path: config.path.clone(),
        message: message.to_string(),
    }
}

fn builder(config: &ConnectionConfig) -> SerialMonResult<serialport::SerialPortBuilder> {
    let mut builder = serialport::new(&config.path, config.baud_rate);

    builder = builder.data_bits(match config.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => return Err(SerialMonError::InvalidInput(format!("Invalid data bits: {}", other))),
    });

    builder = builder.stop_bits(match config.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => return Err(SerialMonError::InvalidInput(format!("Invalid stop bits: {}", other))),
    });

    builder = builder.parity(match config.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    });

    builder = builder.flow_control(match config.flow_control {
        FlowControlConfig::None => serialport::FlowControl::None,
        FlowControlConfig::Software => serialport::FlowControl::Software,
        FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
    });

    Ok(builder.timeout(READ_TIMEOUT))
}

#[async_trait]
impl PortDriver for SerialPortDriver {
    async fn open(&self, config: &ConnectionConfig) -> SerialMonResult<OpenedPort> {
        let builder = builder(config)?;

        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| open_error(config, e))?
            .map_err(|e| open_error(config, e))?;
        let reader = port.try_clone().map_err(|e| open_error(config, e))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let reader_closing = Arc::clone(&closing);
        let reader_path = config.path.clone();
        let reader_thread = std::thread::Builder::new()
            .name(format!("serial-rx {}", config.path))
            .spawn(move || read_loop(reader, reader_path, events_tx, reader_closing))
            .map_err(|e| open_error(config, e))?;

        info!("Serial port {} opened", config.path);

        let handle = SerialPortHandle {
            path: config.path.clone(),
            port: Arc::new(Mutex::new(Some(port))),
            closing,
            reader: Mutex::new(Some(reader_thread)),
        };

        Ok(OpenedPort::new(Arc::new(handle), events_rx))
    }

    async fn list(&self) -> SerialMonResult<Vec<DeviceDescriptor>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| SerialMonError::Enumerate(e.to_string()))??;

        Ok(ports.into_iter().map(describe).collect())
    }
}

/// Map enumeration output to a descriptor. USB ports get a location id built
/// from vendor, product and serial number so the key survives replug onto a
/// different path.
fn describe(info: SerialPortInfo) -> DeviceDescriptor {
    match info.port_type {
        SerialPortType::UsbPort(usb) => DeviceDescriptor {
            location_id: usb
                .serial_number
                .as_ref()
                .map(|serial| format!("{:04x}:{:04x}:{}", usb.vid, usb.pid, serial)),
            path: info.port_name,
            manufacturer: usb.manufacturer,
            serial_number: usb.serial_number,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            port_type: PortType::Usb,
        },
        other => DeviceDescriptor {
            path: info.port_name,
            location_id: None,
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
            port_type: match other {
                SerialPortType::PciPort => PortType::Pci,
                SerialPortType::BluetoothPort => PortType::Bluetooth,
                _ => PortType::Unknown,
            },
        },
    }
}

/// Blocking receive loop, one thread per open port. Sends `Closed` exactly
/// once on the way out.
fn read_loop(
    mut port: Box<dyn SerialPort>,
    path: String,
    events: mpsc::UnboundedSender<PortEvent>,
    closing: Arc<AtomicBool>,
) {
    let mut buffer = vec![0u8; 1024];

    while !closing.load(Ordering::Acquire) {
        match port.read(&mut buffer) {
            Ok(0) => continue,
            Ok(n) => {
                if events.send(PortEvent::Data(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => {
                if !closing.load(Ordering::Acquire) {
                    error!("Failed to read from serial port {}: {}", path, e);
                    let _ = events.send(PortEvent::Error(e.to_string()));
                }
                break;
            }
        }
    }

    drop(port);
    debug!("Reader for {} stopped", path);
    let _ = events.send(PortEvent::Closed);
}

/// Open `serialport` connection
pub struct SerialPortHandle {
    path: String,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    closing: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PortHandle for SerialPortHandle {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let port = Arc::clone(&self.port);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().unwrap_or_else(PoisonError::into_inner);
            let port = guard
                .as_mut()
                .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "port is closed"))?;
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?
    }

    async fn close(&self) -> std::io::Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        let port = Arc::clone(&self.port);

        tokio::task::spawn_blocking(move || {
            if let Some(reader) = reader {
                if reader.join().is_err() {
                    warn!("Serial reader thread panicked");
                }
            }
            port.lock().unwrap_or_else(PoisonError::into_inner).take();
        })
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;

        info!("Serial port {} closed", self.path);
        Ok(())
    }
}

impl Drop for SerialPortHandle {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
    }
}
