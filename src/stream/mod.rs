//! Streaming endpoint multiplexer.
//!
//! [`BinanceWebsocket`] keeps a mutable set of named subscriptions on one
//! upstream host. Any thread may add or remove endpoints while a single
//! thread drives the shared event loop; each endpoint reconnects on its own
//! with a bounded, jittered backoff.
//!
//! ```rust,no_run
//! use binance_stream::stream::{handler_fn, BinanceWebsocket, StreamConfig};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ws = BinanceWebsocket::new(StreamConfig::default());
//! ws.init()?;
//! ws.connect_endpoint(
//!     "btcusdt@kline_1m",
//!     handler_fn(|msg| {
//!         println!("{}", msg["k"]["c"]);
//!         Ok(())
//!     }),
//! )?;
//! ws.enter_event_loop(Duration::from_secs(30))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod event_loop;
pub mod registry;
pub mod retry;
pub mod supervisor;

pub use config::StreamConfig;
pub use dispatcher::{DispatchOutcome, MessageDispatcher};
pub use event_loop::{EventLoopController, KillSwitch, LoopState};
pub use registry::{handler_fn, EndpointRegistry, EndpointSnapshot, EndpointState, Handler};
pub use retry::{Liveness, RetryPolicy};
pub use supervisor::{route_for, ConnectionSupervisor, DropListener, DropReason, StreamTarget};

use crate::core::errors::{BinanceError, StreamError};
use crate::core::kernel::ws::{Transport, TransportFactory, TungsteniteTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Longest accepted endpoint path, exclusive
pub const MAX_PATH_LEN: usize = 1024;

/// Subscription API over the stream registry and its event loop.
///
/// `connect_endpoint` and `disconnect_endpoint` only record intent in the
/// registry and return immediately; the event loop opens and closes the
/// connections on its next iteration.
pub struct BinanceWebsocket {
    registry: Arc<EndpointRegistry>,
    controller: EventLoopController,
}

impl BinanceWebsocket {
    /// Client backed by the tungstenite transport
    pub fn new(config: StreamConfig) -> Self {
        let ws = config.ws.clone();
        let factory = move || -> Result<Box<dyn Transport>, BinanceError> {
            Ok(Box::new(TungsteniteTransport::new(ws.clone())?))
        };
        Self::with_transport_factory(config, Arc::new(factory))
    }

    pub fn with_transport_factory(
        config: StreamConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let registry = Arc::new(EndpointRegistry::new(config.capacity));
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&registry), config.retry.clone(), config.target());
        let controller = EventLoopController::new(
            Arc::clone(&registry),
            supervisor,
            factory,
            config.slice,
            config.shutdown_grace,
        );
        Self {
            registry,
            controller,
        }
    }

    pub fn init(&self) -> Result<(), StreamError> {
        self.controller.init()
    }

    /// Subscribe `handler` to `path`, replacing any existing subscription.
    ///
    /// A path starting with `/` is used as the route; anything else is a raw
    /// stream name served under `/ws/`.
    #[instrument(skip(self, handler))]
    pub fn connect_endpoint(&self, path: &str, handler: Handler) -> Result<(), StreamError> {
        validate_path(path)?;
        self.registry.insert(path, handler)?;
        info!(path, "stream endpoint registered");
        Ok(())
    }

    /// Ask for `path` to be closed; unknown paths are ignored
    #[instrument(skip(self))]
    pub fn disconnect_endpoint(&self, path: &str) {
        if self.registry.request_close(path) {
            info!(path, "stream endpoint close requested");
        } else {
            debug!(path, "disconnect for unknown endpoint ignored");
        }
    }

    pub fn enter_event_loop(&self, max_duration: Duration) -> Result<(), StreamError> {
        self.controller.enter_event_loop(max_duration)
    }

    pub fn kill_all(&self) {
        self.controller.kill_all();
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.controller.kill_switch()
    }

    pub fn pump(&self, slice: Duration) -> Result<(), StreamError> {
        self.controller.pump(slice)
    }

    pub fn shutdown(&self) {
        self.controller.shutdown();
    }

    pub fn state(&self) -> LoopState {
        self.controller.state()
    }

    pub fn set_drop_listener(&self, listener: Option<DropListener>) {
        self.controller.supervisor().set_drop_listener(listener);
    }

    pub fn endpoint(&self, path: &str) -> Option<EndpointSnapshot> {
        self.registry.find(path)
    }

    pub fn endpoints(&self) -> Vec<EndpointSnapshot> {
        let mut snapshots = Vec::with_capacity(self.registry.len());
        self.registry.for_each(|snapshot| snapshots.push(snapshot.clone()));
        snapshots
    }

    pub fn endpoint_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }
}

fn validate_path(path: &str) -> Result<(), StreamError> {
    let reason = if path.is_empty() {
        "path is empty"
    } else if path.len() >= MAX_PATH_LEN {
        "path is too long"
    } else if path.chars().any(char::is_whitespace) {
        "path contains whitespace"
    } else {
        return Ok(());
    };
    Err(StreamError::InvalidPath {
        path: path.to_string(),
        reason,
    })
}
