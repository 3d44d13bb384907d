use crate::core::errors::StreamError;
use crate::core::kernel::ws::ConnectionHandle;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Application callback for one endpoint's messages
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler_fn<F>(f: F) -> Handler
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Default bound on live endpoints
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Registered, no connection attempt made yet
    Idle,
    /// Attempt in flight, or scheduled for `retry_at`
    Connecting,
    Connected,
    /// Close requested from the transport, waiting for confirmation
    Closing,
    Closed,
}

/// One subscription as stored in the registry
pub(crate) struct Endpoint {
    pub(crate) path: String,
    pub(crate) handler: Handler,
    pub(crate) handle: Option<ConnectionHandle>,
    pub(crate) retry_count: u32,
    pub(crate) state: EndpointState,
    pub(crate) close_requested: bool,
    pub(crate) retry_at: Option<Instant>,
    pub(crate) last_activity: Instant,
    pub(crate) probe_outstanding: bool,
}

impl Endpoint {
    fn new(path: String, handler: Handler) -> Self {
        Self {
            path,
            handler,
            handle: None,
            retry_count: 0,
            state: EndpointState::Idle,
            close_requested: false,
            retry_at: None,
            last_activity: Instant::now(),
            probe_outstanding: false,
        }
    }

    fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            path: self.path.clone(),
            handle: self.handle,
            retry_count: self.retry_count,
            state: self.state,
            close_requested: self.close_requested,
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .field("retry_count", &self.retry_count)
            .field("state", &self.state)
            .field("close_requested", &self.close_requested)
            .finish_non_exhaustive()
    }
}

/// Read-only copy of an endpoint, safe to hold outside the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub path: String,
    pub handle: Option<ConnectionHandle>,
    pub retry_count: u32,
    pub state: EndpointState,
    pub close_requested: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RegistryInner {
    pub(crate) entries: HashMap<String, Endpoint>,
    by_handle: HashMap<ConnectionHandle, String>,
    retired: Vec<ConnectionHandle>,
}

impl RegistryInner {
    /// Attach `handle` to `path`, replacing any previous handle
    pub(crate) fn bind(&mut self, path: &str, handle: ConnectionHandle) {
        if let Some(entry) = self.entries.get_mut(path) {
            if let Some(old) = entry.handle.replace(handle) {
                self.by_handle.remove(&old);
            }
            self.by_handle.insert(handle, path.to_string());
        }
    }

    /// Detach the current handle of `path`, returning it
    pub(crate) fn unbind(&mut self, path: &str) -> Option<ConnectionHandle> {
        let handle = self.entries.get_mut(path)?.handle.take()?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub(crate) fn path_of(&self, handle: ConnectionHandle) -> Option<&str> {
        self.by_handle.get(&handle).map(String::as_str)
    }

    pub(crate) fn entry_by_handle(&mut self, handle: ConnectionHandle) -> Option<&mut Endpoint> {
        let path = self.by_handle.get(&handle)?;
        self.entries.get_mut(path)
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<EndpointSnapshot> {
        let entry = self.entries.remove(path)?;
        if let Some(handle) = entry.handle {
            self.by_handle.remove(&handle);
        }
        let mut snapshot = entry.snapshot();
        snapshot.state = EndpointState::Closed;
        Some(snapshot)
    }

    pub(crate) fn retire(&mut self, handle: ConnectionHandle) {
        self.retired.push(handle);
    }
}

/// The authoritative map from stream path to endpoint state.
///
/// Shared between caller threads (insert, remove, close requests) and the
/// event-loop thread (state transitions). A single mutex guards the entries,
/// the `handle → path` index and the list of connections awaiting closure.
#[derive(Debug)]
pub struct EndpointRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EndpointRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            capacity,
        }
    }

    // Handlers run outside the lock and panics are caught, so a poisoned
    // lock still guards consistent data.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register `handler` under `path`.
    ///
    /// An existing entry for `path` is torn down first: it leaves the handle
    /// index immediately and its connection is queued for closing. A new path
    /// is rejected once the registry holds `capacity` entries.
    pub fn insert(&self, path: &str, handler: Handler) -> Result<EndpointSnapshot, StreamError> {
        let mut inner = self.lock();

        if inner.entries.contains_key(path) {
            if let Some(old) = inner.remove(path) {
                debug!(path, handle = ?old.handle, "replacing endpoint");
                if let Some(handle) = old.handle {
                    inner.retire(handle);
                }
            }
        } else if inner.entries.len() >= self.capacity {
            return Err(StreamError::Capacity {
                limit: self.capacity,
            });
        }

        let entry = Endpoint::new(path.to_string(), handler);
        let snapshot = entry.snapshot();
        inner.entries.insert(path.to_string(), entry);
        Ok(snapshot)
    }

    pub fn find(&self, path: &str) -> Option<EndpointSnapshot> {
        self.lock().entries.get(path).map(Endpoint::snapshot)
    }

    pub fn find_by_handle(&self, handle: ConnectionHandle) -> Option<EndpointSnapshot> {
        let mut inner = self.lock();
        inner.entry_by_handle(handle).map(|e| e.snapshot())
    }

    /// Remove `path`; a live connection is queued for closing
    pub fn remove(&self, path: &str) -> Option<EndpointSnapshot> {
        let mut inner = self.lock();
        let removed = inner.remove(path)?;
        if let Some(handle) = removed.handle {
            inner.retire(handle);
        }
        Some(removed)
    }

    /// Visit a snapshot of every entry; the lock is not held during `f`
    pub fn for_each(&self, mut f: impl FnMut(&EndpointSnapshot)) {
        let snapshots: Vec<EndpointSnapshot> =
            self.lock().entries.values().map(Endpoint::snapshot).collect();
        for snapshot in &snapshots {
            f(snapshot);
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `path` for retirement; false if the path is unknown
    pub fn request_close(&self, path: &str) -> bool {
        match self.lock().entries.get_mut(path) {
            Some(entry) => {
                entry.close_requested = true;
                true
            }
            None => false,
        }
    }

    /// Connections of replaced entries that still need closing
    pub fn take_retired(&self) -> Vec<ConnectionHandle> {
        std::mem::take(&mut self.lock().retired)
    }

    /// Remove everything, returning every handle that was still attached
    pub fn clear(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.lock();
        let mut handles = std::mem::take(&mut inner.retired);
        handles.extend(inner.by_handle.drain().map(|(handle, _)| handle));
        inner.entries.clear();
        handles
    }
}
