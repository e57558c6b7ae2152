use crate::core::connection::port::PortHandle;
use crate::domain::connection::ConnectionKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle as stored in the registry. The registry keeps the owning entry;
/// clones handed out by [`ConnectionRegistry::get`] are short-lived borrows for
/// a single write or close.
pub type SharedHandle = Arc<dyn PortHandle>;

/// Map from connection key to its live port handle.
///
/// Presence of an entry when a close event arrives means the close was not
/// requested by us: `disconnect` removes the entry before closing the handle,
/// so an entry that is still here marks the closure as unexpected.
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: RwLock<HashMap<ConnectionKey, SharedHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handle. A previous entry is displaced without being closed and
    /// returned to the caller.
    pub async fn put(&self, key: ConnectionKey, handle: SharedHandle) -> Option<SharedHandle> {
        let mut handles = self.handles.write().await;
        handles.insert(key, handle)
    }

    pub async fn remove(&self, key: &ConnectionKey) -> Option<SharedHandle> {
        let mut handles = self.handles.write().await;
        handles.remove(key)
    }

    pub async fn get(&self, key: &ConnectionKey) -> Option<SharedHandle> {
        let handles = self.handles.read().await;
        handles.get(key).cloned()
    }

    /// Retry-eligibility signal, see the type docs.
    pub async fn contains(&self, key: &ConnectionKey) -> bool {
        let handles = self.handles.read().await;
        handles.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<ConnectionKey> {
        let handles = self.handles.read().await;
        handles.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}
