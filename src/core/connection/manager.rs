use crate::core::connection::{
    port::{OpenedPort, PortDriver, PortEvent},
    reconnect::{self, ReconnectPolicy},
    registry::ConnectionRegistry,
    state::{ConnectionState, ConnectionStatus},
};
use crate::core::events::{ConnectionEvent, EventBus, Subscription};
use crate::core::framing::LineFramer;
use crate::domain::connection::{ConnectionConfig, ConnectionKey, DeviceDescriptor};
use crate::domain::error::{SerialMonError, SerialMonResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long `disconnect` waits for the stream task to process the close
const CLOSE_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifies one run of the reconnect loop for a key
#[derive(Debug, Clone)]
pub(crate) struct LoopTicket {
    pub(crate) id: u64,
    pub(crate) key: ConnectionKey,
    pub(crate) cancel: CancellationToken,
}

/// Bookkeeping kept per key for as long as the manager lives
struct Session {
    config: ConnectionConfig,
    state: ConnectionState,
    retry_count: u32,
    exhausted: bool,
    reconnect: Option<LoopTicket>,
    pump: Option<JoinHandle<()>>,
}

impl Session {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Closed,
            retry_count: 0,
            exhausted: false,
            reconnect: None,
            pump: None,
        }
    }

    fn owns(&self, ticket: &LoopTicket) -> bool {
        self.reconnect.as_ref().map(|current| current.id) == Some(ticket.id)
    }

    fn status(&self, key: &ConnectionKey) -> ConnectionStatus {
        ConnectionStatus {
            key: key.clone(),
            path: self.config.path.clone(),
            baud_rate: self.config.baud_rate,
            state: self.state,
            retry_count: self.retry_count,
            exhausted: self.exhausted,
        }
    }
}

struct Inner {
    driver: Arc<dyn PortDriver>,
    registry: Arc<ConnectionRegistry>,
    bus: EventBus,
    sessions: Mutex<HashMap<ConnectionKey, Session>>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
    next_loop_id: AtomicU64,
}

/// Owns every open serial connection and drives their lifecycle.
///
/// Cloning is cheap and yields another handle to the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager with its own registry and event bus
    pub fn new(driver: Arc<dyn PortDriver>, policy: ReconnectPolicy) -> Self {
        Self::with_parts(driver, Arc::new(ConnectionRegistry::new()), EventBus::new(), policy)
    }

    /// Create a manager around an injected registry and event bus
    pub fn with_parts(
        driver: Arc<dyn PortDriver>,
        registry: Arc<ConnectionRegistry>,
        bus: EventBus,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                registry,
                bus,
                sessions: Mutex::new(HashMap::new()),
                policy,
                shutdown: CancellationToken::new(),
                next_loop_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// Shorthand for `events().subscribe(key)`
    pub fn subscribe(&self, key: &ConnectionKey) -> Subscription {
        self.inner.bus.subscribe(key)
    }

    /// Open a connection and start streaming its events.
    ///
    /// With `is_retry` any registry entry for the key is discarded first. A
    /// running reconnect loop for the key is cancelled. Calling this twice for
    /// one key without `disconnect` in between leaves the first handle open
    /// and unreferenced.
    pub async fn connect(&self, config: ConnectionConfig, is_retry: bool) -> SerialMonResult<()> {
        if self.cancel_reconnect(&config.key).await {
            debug!("Cancelled reconnect loop for '{}' in favour of manual connect", config.key);
        }

        self.begin_attempt(&config).await;

        match self.open_port(&config, is_retry).await {
            Ok(opened) => {
                self.register(config, opened, None).await;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect '{}': {}", config.key, e);
                self.settle_failed_attempt(&config.key).await;
                Err(e)
            }
        }
    }

    /// Close a connection on request. Never triggers a reconnect.
    pub async fn disconnect(&self, key: &ConnectionKey) -> SerialMonResult<()> {
        let (stopped_loop, pump, handle) = {
            let mut sessions = self.inner.sessions.lock().await;
            let (stopped, pump) = match sessions.get_mut(key) {
                Some(session) => {
                    let stopped = match session.reconnect.take() {
                        Some(ticket) => {
                            ticket.cancel.cancel();
                            true
                        }
                        None => false,
                    };
                    (stopped, session.pump.take())
                }
                None => (false, None),
            };
            // Removed under the session lock so the stream task classifies
            // the coming close as expected.
            (stopped, pump, self.inner.registry.remove(key).await)
        };

        let handle = match handle {
            Some(handle) => handle,
            None if stopped_loop => {
                self.set_state(key, ConnectionState::Closed).await;
                info!("Stopped reconnecting '{}'", key);
                return Ok(());
            }
            None => return Err(SerialMonError::not_found(key)),
        };

        if let Err(e) = handle.close().await {
            warn!("Error while closing '{}', treating as closed: {}", key, e);
        }
        drop(handle);

        if let Some(pump) = pump {
            if tokio::time::timeout(CLOSE_SETTLE_TIMEOUT, pump).await.is_err() {
                debug!("Close of '{}' not yet observed by its stream task", key);
            }
        }

        self.set_state(key, ConnectionState::Closed).await;
        info!("Disconnected '{}'", key);
        Ok(())
    }

    /// Send one line of text. The line terminator is appended here.
    pub async fn write(&self, key: &ConnectionKey, text: &str) -> SerialMonResult<()> {
        let handle = self
            .inner
            .registry
            .get(key)
            .await
            .ok_or_else(|| SerialMonError::not_found(key))?;

        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(b'\n');

        handle.write(&payload).await.map_err(|e| SerialMonError::Write {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        debug!("Wrote {} bytes to '{}'", payload.len(), key);
        Ok(())
    }

    /// Manually resume reconnecting, resetting the retry counter.
    pub async fn reconnect(&self, key: &ConnectionKey) -> SerialMonResult<()> {
        {
            let mut sessions = self.inner.sessions.lock().await;
            let session = sessions.get_mut(key).ok_or_else(|| SerialMonError::not_found(key))?;

            if session.reconnect.is_some() {
                return Err(SerialMonError::ReconnectInProgress { key: key.to_string() });
            }
            if session.state == ConnectionState::Open && self.inner.registry.contains(key).await {
                debug!("Ignoring reconnect for open connection '{}'", key);
                return Ok(());
            }

            session.retry_count = 0;
            session.exhausted = false;
        }

        self.start_loop(key).await.map(|_| ())
    }

    pub async fn status(&self, key: &ConnectionKey) -> Option<ConnectionStatus> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(key).map(|session| session.status(key))
    }

    pub async fn statuses(&self) -> Vec<ConnectionStatus> {
        let sessions = self.inner.sessions.lock().await;
        let mut statuses: Vec<_> = sessions.iter().map(|(key, session)| session.status(key)).collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub async fn list_devices(&self) -> SerialMonResult<Vec<DeviceDescriptor>> {
        self.inner.driver.list().await
    }

    /// Tear everything down: stop all reconnect loops, then close every
    /// registered handle as an expected close.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        {
            let mut sessions = self.inner.sessions.lock().await;
            for session in sessions.values_mut() {
                if let Some(ticket) = session.reconnect.take() {
                    ticket.cancel.cancel();
                    session.state = ConnectionState::Closed;
                }
            }
        }

        for key in self.inner.registry.keys().await {
            if let Some(handle) = self.inner.registry.remove(&key).await {
                if let Err(e) = handle.close().await {
                    warn!("Error while closing '{}' during shutdown: {}", key, e);
                }
            }
        }

        info!("Connection manager shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn begin_attempt(&self, config: &ConnectionConfig) {
        let mut sessions = self.inner.sessions.lock().await;
        let session = sessions
            .entry(config.key.clone())
            .or_insert_with(|| Session::new(config.clone()));
        session.config = config.clone();
        session.state = ConnectionState::Connecting;
    }

    async fn settle_failed_attempt(&self, key: &ConnectionKey) {
        let live = self.inner.registry.contains(key).await;
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(key) {
            if session.state == ConnectionState::Connecting {
                session.state = if live { ConnectionState::Open } else { ConnectionState::Closed };
            }
        }
    }

    async fn set_state(&self, key: &ConnectionKey, state: ConnectionState) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(key) {
            session.state = state;
        }
    }

    /// Steps 1 and 2 of a connect: drop the stale entry on retry, then open.
    pub(crate) async fn open_port(
        &self,
        config: &ConnectionConfig,
        is_retry: bool,
    ) -> SerialMonResult<OpenedPort> {
        if is_retry && self.inner.registry.remove(&config.key).await.is_some() {
            debug!("Discarded previous handle for '{}' before retry", config.key);
        }

        let opened = self.inner.driver.open(config).await?;
        info!("Opened {} at {} baud as '{}'", config.path, config.baud_rate, config.key);
        Ok(opened)
    }

    /// Retry variant of [`Self::open_port`]. The stale entry is only dropped
    /// while the loop still owns the key; `Ok(None)` means it no longer does.
    pub(crate) async fn retry_open(
        &self,
        config: &ConnectionConfig,
        ticket: &LoopTicket,
    ) -> SerialMonResult<Option<OpenedPort>> {
        {
            let sessions = self.inner.sessions.lock().await;
            let owned = sessions.get(&ticket.key).is_some_and(|session| session.owns(ticket));
            if !owned || ticket.cancel.is_cancelled() {
                return Ok(None);
            }
            if self.inner.registry.remove(&config.key).await.is_some() {
                debug!("Discarded previous handle for '{}' before retry", config.key);
            }
        }

        let opened = self.inner.driver.open(config).await?;
        info!("Reopened {} at {} baud as '{}'", config.path, config.baud_rate, config.key);
        Ok(Some(opened))
    }

    /// Steps 3 and 4 of a connect: register the handle and start its stream
    /// task. When called from a reconnect loop that has been cancelled in the
    /// meantime, the fresh handle is closed instead and `false` is returned.
    pub(crate) async fn register(
        &self,
        config: ConnectionConfig,
        opened: OpenedPort,
        ticket: Option<&LoopTicket>,
    ) -> bool {
        let OpenedPort { handle, events } = opened;
        let key = config.key.clone();
        let mut sessions = self.inner.sessions.lock().await;

        if let Some(ticket) = ticket {
            let superseded = sessions.get(&key).map_or(true, |session| !session.owns(ticket));
            if ticket.cancel.is_cancelled() || superseded {
                drop(sessions);
                debug!("Reconnect for '{}' cancelled while opening, closing fresh handle", key);
                if let Err(e) = handle.close().await {
                    debug!("Error closing abandoned handle for '{}': {}", key, e);
                }
                return false;
            }
        }

        if self.inner.registry.put(key.clone(), handle).await.is_some() {
            warn!("Replaced a live handle for '{}' without closing it; disconnect first to release it", key);
        }

        let pump = tokio::spawn(self.clone().pump(key.clone(), events));

        let session = sessions.entry(key).or_insert_with(|| Session::new(config.clone()));
        session.config = config;
        session.state = ConnectionState::Open;
        session.retry_count = 0;
        session.exhausted = false;
        if ticket.is_some_and(|ticket| session.owns(ticket)) {
            session.reconnect = None;
        }
        session.pump = Some(pump);
        true
    }

    /// Per-connection stream task: frame inbound bytes and republish.
    async fn pump(self, key: ConnectionKey, mut events: mpsc::UnboundedReceiver<PortEvent>) {
        let mut framer = LineFramer::new();

        while let Some(event) = events.recv().await {
            match event {
                PortEvent::Data(bytes) => {
                    debug!("Received {} bytes on '{}'", bytes.len(), key);
                    for line in framer.push(&bytes) {
                        self.inner.bus.publish(ConnectionEvent::Data { key: key.clone(), line });
                    }
                }
                PortEvent::Error(message) => {
                    let err = SerialMonError::Stream { key: key.to_string(), message };
                    error!("{}", err);
                    self.inner.bus.publish(ConnectionEvent::error(key.clone(), &err));
                }
                PortEvent::Closed => break,
            }
        }

        if let Some(line) = framer.flush() {
            self.inner.bus.publish(ConnectionEvent::Data { key: key.clone(), line });
        }

        self.handle_close(&key).await;
    }

    /// A handle reported closure. Still being registered means nobody asked
    /// for it, so the key goes into the reconnect loop. The check and the
    /// loop ticket share one session lock with `disconnect`.
    async fn handle_close(&self, key: &ConnectionKey) {
        let mut sessions = self.inner.sessions.lock().await;
        let expected = !self.inner.registry.contains(key).await;

        if expected {
            if let Some(session) = sessions.get_mut(key) {
                if session.reconnect.is_none() && session.state == ConnectionState::Open {
                    session.state = ConnectionState::Closed;
                }
            }
            drop(sessions);

            info!("Connection '{}' closed", key);
            self.inner.bus.publish(ConnectionEvent::Closed { key: key.clone(), retry: false });
            return;
        }

        if self.inner.shutdown.is_cancelled() {
            debug!("Ignoring close of '{}' during shutdown", key);
            return;
        }

        let armed = self.arm_loop(&mut sessions, key);
        drop(sessions);

        warn!("Connection '{}' dropped unexpectedly", key);
        self.inner.bus.publish(ConnectionEvent::Closed { key: key.clone(), retry: true });

        match armed {
            Ok(Some((config, ticket))) => self.spawn_loop(config, ticket),
            Ok(None) => {}
            Err(e) => error!("Could not start reconnect loop for '{}': {}", key, e),
        }
    }

    /// Spawn the reconnect loop unless one already runs for the key.
    async fn start_loop(&self, key: &ConnectionKey) -> SerialMonResult<bool> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(false);
        }

        let armed = {
            let mut sessions = self.inner.sessions.lock().await;
            self.arm_loop(&mut sessions, key)?
        };

        match armed {
            Some((config, ticket)) => {
                self.spawn_loop(config, ticket);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Install a fresh loop ticket on the key's session. `None` when a loop
    /// already owns the key.
    fn arm_loop(
        &self,
        sessions: &mut HashMap<ConnectionKey, Session>,
        key: &ConnectionKey,
    ) -> SerialMonResult<Option<(ConnectionConfig, LoopTicket)>> {
        let session = sessions.get_mut(key).ok_or_else(|| SerialMonError::not_found(key))?;

        if session.reconnect.is_some() {
            debug!("Reconnect loop for '{}' already running", key);
            return Ok(None);
        }

        let ticket = LoopTicket {
            id: self.inner.next_loop_id.fetch_add(1, Ordering::Relaxed),
            key: key.clone(),
            cancel: self.inner.shutdown.child_token(),
        };
        session.reconnect = Some(ticket.clone());
        session.state = ConnectionState::Reconnecting;
        session.exhausted = false;
        Ok(Some((session.config.clone(), ticket)))
    }

    fn spawn_loop(&self, config: ConnectionConfig, ticket: LoopTicket) {
        info!("Reconnecting '{}' every {:?}", ticket.key, self.inner.policy.delay);
        tokio::spawn(reconnect::run(self.clone(), config, ticket));
    }

    async fn cancel_reconnect(&self, key: &ConnectionKey) -> bool {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(key).and_then(|session| session.reconnect.take()) {
            Some(ticket) => {
                ticket.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn retry_count(&self, key: &ConnectionKey) -> Option<u32> {
        let sessions = self.inner.sessions.lock().await;
        sessions.get(key).map(|session| session.retry_count)
    }

    /// Count a failed attempt. Returns `false` when the loop no longer owns
    /// the key and should stop.
    pub(crate) async fn record_failed_attempt(&self, ticket: &LoopTicket) -> bool {
        let mut sessions = self.inner.sessions.lock().await;
        match sessions.get_mut(&ticket.key) {
            Some(session) if session.owns(ticket) && !ticket.cancel.is_cancelled() => {
                session.retry_count = session.retry_count.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    pub(crate) async fn finish_exhausted(&self, ticket: &LoopTicket) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&ticket.key) {
            if session.owns(ticket) {
                session.reconnect = None;
                session.state = ConnectionState::Closed;
                session.exhausted = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::port::PortHandle;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Driver whose opens always fail, counting attempts
    #[derive(Default)]
    struct RefusingDriver {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl PortDriver for RefusingDriver {
        async fn open(&self, config: &ConnectionConfig) -> SerialMonResult<OpenedPort> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SerialMonError::Open { path: config.path.clone(), message: "No such file or directory".into() })
        }

        async fn list(&self) -> SerialMonResult<Vec<DeviceDescriptor>> {
            Ok(Vec::new())
        }
    }

    struct SilentHandle;

    #[async_trait]
    impl PortHandle for SilentHandle {
        fn path(&self) -> &str {
            "/dev/null"
        }

        async fn write(&self, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        async fn close(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn manager(driver: Arc<RefusingDriver>) -> ConnectionManager {
        ConnectionManager::new(driver, ReconnectPolicy::new(Duration::from_millis(5), 3))
    }

    #[tokio::test]
    async fn test_failed_connect_reports_open_error() {
        let driver = Arc::new(RefusingDriver::default());
        let manager = manager(driver.clone());

        let result = manager.connect(ConnectionConfig::new("/dev/ttyUSB9", 9600), false).await;

        assert!(matches!(result, Err(SerialMonError::Open { .. })));
        assert_eq!(driver.attempts.load(Ordering::SeqCst), 1);
        let status = manager.status(&"/dev/ttyUSB9".into()).await.unwrap();
        assert_eq!(status.state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_key() {
        let manager = manager(Arc::new(RefusingDriver::default()));
        let result = manager.disconnect(&"COM7".into()).await;
        assert!(matches!(result, Err(SerialMonError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_write_unknown_key_publishes_nothing() {
        let manager = manager(Arc::new(RefusingDriver::default()));
        let key = ConnectionKey::from("COM7");
        let mut sub = manager.subscribe(&key);

        let result = manager.write(&key, "hello").await;

        assert!(matches!(result, Err(SerialMonError::NotFound { .. })));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_unknown_key() {
        let manager = manager(Arc::new(RefusingDriver::default()));
        let result = manager.reconnect(&"COM7".into()).await;
        assert!(matches!(result, Err(SerialMonError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_register_rejects_cancelled_ticket() {
        let manager = manager(Arc::new(RefusingDriver::default()));
        let config = ConnectionConfig::new("COM5", 9600);
        let (_tx, rx) = mpsc::unbounded_channel();
        let ticket = LoopTicket { id: 99, key: config.key.clone(), cancel: CancellationToken::new() };
        ticket.cancel.cancel();

        let registered = manager
            .register(config.clone(), OpenedPort::new(Arc::new(SilentHandle), rx), Some(&ticket))
            .await;

        assert!(!registered);
        assert!(!manager.registry().contains(&config.key).await);
    }

    #[tokio::test]
    async fn test_exhausted_loop_stops_at_max_retry() {
        let driver = Arc::new(RefusingDriver::default());
        let manager = manager(driver.clone());
        let config = ConnectionConfig::new("COM8", 9600);
        let _ = manager.connect(config.clone(), false).await;

        manager.reconnect(&config.key).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let status = manager.status(&config.key).await.unwrap();
                if status.exhausted {
                    break status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // One manual connect plus three retries
        assert_eq!(driver.attempts.load(Ordering::SeqCst), 4);
        let status = manager.status(&config.key).await.unwrap();
        assert_eq!(status.retry_count, 3);
        assert_eq!(status.state, ConnectionState::Closed);
    }
}
