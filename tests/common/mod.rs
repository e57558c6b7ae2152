//! Scripted in-memory serial driver shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serialmon::core::connection::{OpenedPort, PortDriver, PortEvent, PortHandle};
use serialmon::domain::connection::{ConnectionConfig, DeviceDescriptor, PortType};
use serialmon::{
    ConnectionEvent, ConnectionKey, ConnectionManager, ConnectionStatus, ReconnectPolicy,
    SerialMonError, SerialMonResult, Subscription,
};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Fake device. Echoes every write back as received data.
pub struct MockHandle {
    path: String,
    events: Mutex<Option<mpsc::UnboundedSender<PortEvent>>>,
    closed: AtomicBool,
    written: Mutex<Vec<u8>>,
}

impl MockHandle {
    fn new(path: &str, events: mpsc::UnboundedSender<PortEvent>) -> Self {
        Self {
            path: path.to_string(),
            events: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Bytes arriving from the device
    pub fn inject(&self, bytes: &[u8]) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(PortEvent::Data(bytes.to_vec()));
        }
    }

    /// The device vanished: an error followed by a close nobody asked for
    pub fn unplug(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(events) = self.events.lock().unwrap().take() {
            let _ = events.send(PortEvent::Error("device removed".to_string()));
            let _ = events.send(PortEvent::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortHandle for MockHandle {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port is closed"));
        }
        self.written.lock().unwrap().extend_from_slice(data);
        self.inject(data);
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(events) = self.events.lock().unwrap().take() {
            let _ = events.send(PortEvent::Closed);
        }
        Ok(())
    }
}

#[derive(Default)]
struct DriverState {
    opens: usize,
    fail_next: usize,
    unavailable: bool,
    handles: HashMap<String, Vec<Arc<MockHandle>>>,
    devices: Vec<DeviceDescriptor>,
}

/// Driver whose open results are scripted by the test
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<DriverState>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` opens fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// While unavailable every open fails
    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().unavailable = !available;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn handles(&self, path: &str) -> Vec<Arc<MockHandle>> {
        self.state.lock().unwrap().handles.get(path).cloned().unwrap_or_default()
    }

    pub fn latest_handle(&self, path: &str) -> Option<Arc<MockHandle>> {
        self.handles(path).last().cloned()
    }

    pub fn add_device(&self, path: &str, location_id: Option<&str>) {
        self.state.lock().unwrap().devices.push(DeviceDescriptor {
            path: path.to_string(),
            location_id: location_id.map(str::to_string),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
            port_type: PortType::Usb,
        });
    }
}

#[async_trait]
impl PortDriver for MockDriver {
    async fn open(&self, config: &ConnectionConfig) -> SerialMonResult<OpenedPort> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;

        if state.unavailable || state.fail_next > 0 {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(SerialMonError::Open {
                path: config.path.clone(),
                message: "No such file or directory".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(MockHandle::new(&config.path, tx));
        state.handles.entry(config.path.clone()).or_default().push(Arc::clone(&handle));

        Ok(OpenedPort::new(handle, rx))
    }

    async fn list(&self) -> SerialMonResult<Vec<DeviceDescriptor>> {
        Ok(self.state.lock().unwrap().devices.clone())
    }
}

pub fn manager_with(driver: &Arc<MockDriver>, delay_ms: u64, max_retry: u32) -> ConnectionManager {
    ConnectionManager::new(
        Arc::clone(driver) as Arc<dyn PortDriver>,
        ReconnectPolicy::new(Duration::from_millis(delay_ms), max_retry),
    )
}

pub fn config(path: &str) -> ConnectionConfig {
    ConnectionConfig::new(path, 115200)
}

pub fn key(path: &str) -> ConnectionKey {
    ConnectionKey::new(path)
}

/// Next event or panic after [`EVENT_TIMEOUT`]
pub async fn next_event(subscription: &mut Subscription) -> ConnectionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Skip events until one matches
pub async fn wait_for_event<F>(subscription: &mut Subscription, mut matches: F) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    loop {
        let event = next_event(subscription).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Poll a condition until it holds or [`EVENT_TIMEOUT`] passes
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll the manager until the key's status satisfies `predicate`
pub async fn wait_for_status<F>(
    manager: &ConnectionManager,
    key: &ConnectionKey,
    mut predicate: F,
) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        if let Some(status) = manager.status(key).await {
            if predicate(&status) {
                return status;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "status not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
