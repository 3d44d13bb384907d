#![allow(dead_code)]

use binance_stream::core::errors::BinanceError;
use binance_stream::core::kernel::ws::{
    ConnectRequest, ConnectionHandle, Transport, TransportEvent, TransportFactory,
};
use binance_stream::stream::{BinanceWebsocket, RetryPolicy, StreamConfig};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Everything the scripted transport saw, shared with the test
#[derive(Debug, Default)]
pub struct Script {
    pub connects: Vec<(ConnectionHandle, ConnectRequest)>,
    pub closes: Vec<ConnectionHandle>,
    pub pings: Vec<ConnectionHandle>,
    pub pending: VecDeque<TransportEvent>,
    /// Routes whose connect attempts fail
    pub failing: HashSet<String>,
    pub created: usize,
    pub shutdowns: usize,
    pub fail_create: bool,
    /// The next `service` call panics
    pub panic_on_service: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn push(&self, event: TransportEvent) {
        self.lock().pending.push_back(event);
    }

    pub fn fail_route(&self, route: &str) {
        self.lock().failing.insert(route.to_string());
    }

    pub fn connects_to(&self, route: &str) -> usize {
        self.lock()
            .connects
            .iter()
            .filter(|(_, request)| request.path == route)
            .count()
    }

    /// Handle of the most recent attempt on `route`
    pub fn last_handle(&self, route: &str) -> Option<ConnectionHandle> {
        self.lock()
            .connects
            .iter()
            .rev()
            .find(|(_, request)| request.path == route)
            .map(|(handle, _)| *handle)
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        let script = self.clone();
        Arc::new(move || -> Result<Box<dyn Transport>, BinanceError> {
            let mut state = script.lock();
            if state.fail_create {
                return Err(BinanceError::Other("no transport today".to_string()));
            }
            state.created += 1;
            drop(state);
            Ok(Box::new(ScriptedTransport {
                script: script.clone(),
            }))
        })
    }
}

/// In-memory transport: connects succeed (or fail for scripted routes)
/// immediately, closes confirm immediately, and tests inject any other
/// event through the script.
pub struct ScriptedTransport {
    script: ScriptHandle,
}

impl Transport for ScriptedTransport {
    fn connect(
        &mut self,
        handle: ConnectionHandle,
        request: &ConnectRequest,
    ) -> Result<(), BinanceError> {
        let mut script = self.script.lock();
        script.connects.push((handle, request.clone()));
        let event = if script.failing.contains(&request.path) {
            TransportEvent::ConnectionError(handle, "connection refused".to_string())
        } else {
            TransportEvent::Established(handle)
        };
        script.pending.push_back(event);
        Ok(())
    }

    fn ping(&mut self, handle: ConnectionHandle) {
        self.script.lock().pings.push(handle);
    }

    fn close(&mut self, handle: ConnectionHandle) {
        let mut script = self.script.lock();
        script.closes.push(handle);
        script
            .pending
            .push_back(TransportEvent::Closed(handle, "closed locally".to_string()));
    }

    fn service(&mut self, slice: Duration) -> Vec<TransportEvent> {
        let mut script = self.script.lock();
        if script.panic_on_service {
            script.panic_on_service = false;
            // release the lock first so the script is not poisoned
            drop(script);
            panic!("transport blew up");
        }
        let events: Vec<_> = script.pending.drain(..).collect();
        drop(script);
        if events.is_empty() && !slice.is_zero() {
            thread::sleep(slice);
        }
        events
    }

    fn shutdown(&mut self, _grace: Duration) {
        self.script.lock().shutdowns += 1;
    }
}

pub fn test_config() -> StreamConfig {
    StreamConfig::default()
        .host("localhost", 9443)
        .slice(Duration::from_millis(20))
}

/// Backoff without delays so every pump makes one attempt
pub fn instant_retry(attempts: usize) -> RetryPolicy {
    RetryPolicy::with_table(vec![Duration::ZERO; attempts]).with_jitter_percent(0)
}

pub fn scripted(config: StreamConfig) -> (BinanceWebsocket, ScriptHandle) {
    let script = ScriptHandle::default();
    let ws = BinanceWebsocket::with_transport_factory(config, script.factory());
    (ws, script)
}

pub fn pump(ws: &BinanceWebsocket, times: usize) {
    for _ in 0..times {
        ws.pump(Duration::ZERO).unwrap();
    }
}
