use crate::core::kernel::ws::{ConnectRequest, ConnectionHandle, Transport};
use crate::stream::registry::{EndpointRegistry, EndpointState};
use crate::stream::retry::{Liveness, RetryPolicy};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

/// Why an endpoint left the registry without being asked to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Called on the event-loop thread when an endpoint is dropped for good
pub type DropListener = Arc<dyn Fn(&str, &DropReason) + Send + Sync>;

/// Fixed upstream every endpoint connects to
#[derive(Debug, Clone)]
pub struct StreamTarget {
    pub host: String,
    pub port: u16,
    pub protocol: String,
}

impl StreamTarget {
    pub fn request_for(&self, path: &str) -> ConnectRequest {
        ConnectRequest {
            host: self.host.clone(),
            port: self.port,
            path: route_for(path),
            protocol: self.protocol.clone(),
            tls: true,
        }
    }
}

/// Paths starting with `/` are routes; anything else is a raw stream name
pub fn route_for(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/ws/{}", path)
    }
}

enum Action {
    Open(String),
    Close(ConnectionHandle),
    Ping(ConnectionHandle),
    Dead(ConnectionHandle),
}

/// Opens connections for registry entries and decides what happens when
/// they fail. Runs on the event-loop thread only.
pub struct ConnectionSupervisor {
    registry: Arc<EndpointRegistry>,
    policy: RetryPolicy,
    target: StreamTarget,
    next_handle: AtomicU64,
    drop_listener: Mutex<Option<DropListener>>,
}

impl ConnectionSupervisor {
    pub fn new(registry: Arc<EndpointRegistry>, policy: RetryPolicy, target: StreamTarget) -> Self {
        Self {
            registry,
            policy,
            target,
            next_handle: AtomicU64::new(1),
            drop_listener: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn set_drop_listener(&self, listener: Option<DropListener>) {
        *self
            .drop_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Start a connection attempt for `path`.
    ///
    /// The handle is bound to the entry before the transport is asked to
    /// connect, so every event the attempt produces can be attributed.
    #[instrument(skip(self, transport))]
    pub fn open(&self, transport: &mut dyn Transport, path: &str) {
        let handle = ConnectionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        {
            let mut inner = self.registry.lock();
            let Some(entry) = inner.entries.get_mut(path) else {
                trace!("endpoint vanished before open");
                return;
            };
            if entry.close_requested {
                return;
            }
            entry.state = EndpointState::Connecting;
            entry.retry_at = None;
            entry.probe_outstanding = false;
            inner.bind(path, handle);
        }

        let request = self.target.request_for(path);
        debug!(%handle, url = %request.url(), "opening stream connection");
        if let Err(e) = transport.connect(handle, &request) {
            self.on_failure(handle, &e.to_string());
        }
    }

    pub fn on_established(&self, handle: ConnectionHandle) {
        let mut inner = self.registry.lock();
        let Some(entry) = inner.entry_by_handle(handle) else {
            debug!(%handle, "established event for stale connection");
            return;
        };
        if entry.state == EndpointState::Connecting {
            entry.state = EndpointState::Connected;
        }
        entry.retry_count = 0;
        entry.last_activity = Instant::now();
        entry.probe_outstanding = false;
        info!(path = %entry.path, %handle, "stream connected");
    }

    pub fn on_pong(&self, handle: ConnectionHandle) {
        if let Some(entry) = self.registry.lock().entry_by_handle(handle) {
            entry.last_activity = Instant::now();
            entry.probe_outstanding = false;
        }
    }

    /// A connect attempt failed or a connection closed.
    ///
    /// Requested closes retire the endpoint; anything else is retried after a
    /// backoff delay until the policy's ceiling, then only this endpoint is
    /// dropped.
    pub fn on_failure(&self, handle: ConnectionHandle, reason: &str) {
        let dropped = {
            let mut inner = self.registry.lock();
            let Some(path) = inner.path_of(handle).map(str::to_string) else {
                trace!(%handle, reason, "close event for stale connection");
                return;
            };
            inner.unbind(&path);

            let Some(entry) = inner.entries.get_mut(&path) else {
                return;
            };
            entry.state = EndpointState::Closed;

            if entry.close_requested {
                inner.remove(&path);
                info!(path = %path, %handle, "stream closed");
                return;
            }

            entry.retry_count = entry.retry_count.saturating_add(1);
            if self.policy.is_exhausted(entry.retry_count) {
                let attempts = entry.retry_count;
                inner.remove(&path);
                error!(
                    path = %path,
                    attempts,
                    reason,
                    "retries exhausted, dropping endpoint"
                );
                Some((
                    path,
                    DropReason::RetriesExhausted {
                        attempts,
                        last_error: reason.to_string(),
                    },
                ))
            } else {
                let delay = self.policy.next_delay(entry.retry_count - 1);
                entry.state = EndpointState::Connecting;
                entry.retry_at = Some(Instant::now() + delay);
                warn!(
                    path = %path,
                    retry_count = entry.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "stream connection lost, reconnect scheduled"
                );
                None
            }
        };

        if let Some((path, reason)) = dropped {
            self.notify_dropped(&path, &reason);
        }
    }

    fn notify_dropped(&self, path: &str, reason: &DropReason) {
        let listener = self
            .drop_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            if catch_unwind(AssertUnwindSafe(|| listener(path, reason))).is_err() {
                error!(path, "drop listener panicked");
            }
        }
    }

    /// Act on everything other threads asked for and on elapsed timers:
    /// close replaced or disconnected endpoints, open new and due ones,
    /// probe idle connections and fail dead ones.
    pub fn reconcile(&self, transport: &mut dyn Transport, now: Instant) {
        for handle in self.registry.take_retired() {
            debug!(%handle, "closing replaced connection");
            transport.close(handle);
        }

        let mut actions = Vec::new();
        {
            let mut inner = self.registry.lock();
            let mut finished = Vec::new();

            for entry in inner.entries.values_mut() {
                if entry.close_requested {
                    match entry.handle {
                        Some(handle) if entry.state != EndpointState::Closing => {
                            entry.state = EndpointState::Closing;
                            actions.push(Action::Close(handle));
                        }
                        Some(_) => {}
                        None => finished.push(entry.path.clone()),
                    }
                    continue;
                }

                match entry.state {
                    EndpointState::Idle => actions.push(Action::Open(entry.path.clone())),
                    EndpointState::Connecting if entry.handle.is_none() => {
                        if entry.retry_at.map_or(true, |at| at <= now) {
                            actions.push(Action::Open(entry.path.clone()));
                        }
                    }
                    EndpointState::Connected => {
                        let Some(handle) = entry.handle else { continue };
                        let idle = now.saturating_duration_since(entry.last_activity);
                        match self.policy.liveness(idle, entry.probe_outstanding) {
                            Liveness::Healthy => {}
                            Liveness::Probe => {
                                entry.probe_outstanding = true;
                                actions.push(Action::Ping(handle));
                            }
                            Liveness::Dead => actions.push(Action::Dead(handle)),
                        }
                    }
                    _ => {}
                }
            }

            for path in finished {
                inner.remove(&path);
                info!(path = %path, "stream closed");
            }
        }

        for action in actions {
            match action {
                Action::Open(path) => self.open(transport, &path),
                Action::Close(handle) => transport.close(handle),
                Action::Ping(handle) => {
                    trace!(%handle, "sending liveness probe");
                    transport.ping(handle);
                }
                Action::Dead(handle) => {
                    warn!(%handle, "connection idle past liveness limit");
                    transport.close(handle);
                    self.on_failure(handle, "liveness timeout");
                }
            }
        }
    }
}
