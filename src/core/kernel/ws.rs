use crate::core::errors::BinanceError;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, instrument, trace, warn};

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Worker threads of the runtime driving socket I/O
    pub worker_threads: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000, // 10 seconds
            worker_threads: 2,
        }
    }
}

/// Opaque identifier of one transport-level connection attempt.
///
/// Handles are allocated by the caller of [`Transport::connect`] and never
/// reused, so an event carrying an old handle can always be told apart from
/// events of a newer connection on the same route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Parameters for opening one streaming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    /// Route on the upstream host, always starting with `/`
    pub path: String,
    /// Protocol identifier announced for the connection family
    pub protocol: String,
    pub tls: bool,
}

impl ConnectRequest {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// What the transport reports back from a `service` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed
    Established(ConnectionHandle),
    /// One inbound data frame
    Received(ConnectionHandle, Vec<u8>),
    /// Reply to a liveness probe
    Pong(ConnectionHandle),
    /// The connection could not be established
    ConnectionError(ConnectionHandle, String),
    /// An established connection went away (either side)
    Closed(ConnectionHandle, String),
}

impl TransportEvent {
    pub const fn handle(&self) -> ConnectionHandle {
        match self {
            Self::Established(h)
            | Self::Received(h, _)
            | Self::Pong(h)
            | Self::ConnectionError(h, _)
            | Self::Closed(h, _) => *h,
        }
    }
}

/// Transport context: the only thing that touches sockets.
///
/// Owned by the event-loop thread. Every method except `service` must return
/// without blocking; outcomes of `connect`, `ping` and `close` are reported
/// later as [`TransportEvent`]s.
pub trait Transport: Send {
    /// Start connecting; `handle` identifies the connection in later events
    fn connect(
        &mut self,
        handle: ConnectionHandle,
        request: &ConnectRequest,
    ) -> Result<(), BinanceError>;

    /// Send a transport-level liveness probe
    fn ping(&mut self, handle: ConnectionHandle);

    /// Ask for the connection to be closed; a `Closed` event follows
    fn close(&mut self, handle: ConnectionHandle);

    /// Process pending I/O for at most `slice` and return what happened
    fn service(&mut self, slice: Duration) -> Vec<TransportEvent>;

    /// Close everything, waiting at most `grace` for connections to finish
    fn shutdown(&mut self, grace: Duration);
}

/// Allocates a fresh transport context
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Transport>, BinanceError>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Result<Box<dyn Transport>, BinanceError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Transport>, BinanceError> {
        self()
    }
}

#[derive(Debug)]
enum Command {
    Ping,
    Close,
}

/// Tungstenite-based transport; one runtime task per connection.
///
/// Connection tasks report over a std channel and `service` waits on it with
/// `recv_timeout`, so the transport never calls `block_on` and can be driven
/// from a thread that is itself running inside a tokio runtime.
pub struct TungsteniteTransport {
    runtime: Option<Runtime>,
    events_tx: std_mpsc::Sender<TransportEvent>,
    events_rx: std_mpsc::Receiver<TransportEvent>,
    connections: HashMap<ConnectionHandle, mpsc::UnboundedSender<Command>>,
    config: WsConfig,
}

impl TungsteniteTransport {
    pub fn new(config: WsConfig) -> Result<Self, BinanceError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("binance-ws")
            .enable_all()
            .build()
            .map_err(|e| BinanceError::Other(format!("Failed to build stream runtime: {}", e)))?;

        let (events_tx, events_rx) = std_mpsc::channel();

        Ok(Self {
            runtime: Some(runtime),
            events_tx,
            events_rx,
            connections: HashMap::new(),
            config,
        })
    }

    fn forget_finished(&mut self, events: &[TransportEvent]) {
        for event in events {
            if let TransportEvent::ConnectionError(handle, _) | TransportEvent::Closed(handle, _) =
                event
            {
                self.connections.remove(handle);
            }
        }
    }
}

impl Transport for TungsteniteTransport {
    #[instrument(skip(self, request), fields(handle = %handle, url = %request.url()))]
    fn connect(
        &mut self,
        handle: ConnectionHandle,
        request: &ConnectRequest,
    ) -> Result<(), BinanceError> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let events = self.events_tx.clone();
        let url = request.url();
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let Some(runtime) = self.runtime.as_ref() else {
            return Err(BinanceError::Other("stream transport is shut down".to_string()));
        };
        runtime.spawn(run_connection(
            handle,
            url,
            connect_timeout,
            commands_rx,
            events,
        ));
        self.connections.insert(handle, commands_tx);
        Ok(())
    }

    fn ping(&mut self, handle: ConnectionHandle) {
        if let Some(commands) = self.connections.get(&handle) {
            let _ = commands.send(Command::Ping);
        }
    }

    fn close(&mut self, handle: ConnectionHandle) {
        match self.connections.get(&handle) {
            Some(commands) => {
                let _ = commands.send(Command::Close);
            }
            None => trace!(%handle, "close requested for unknown connection"),
        }
    }

    fn service(&mut self, slice: Duration) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if let Ok(event) = self.events_rx.recv_timeout(slice) {
            events.push(event);
            events.extend(self.events_rx.try_iter());
        }

        self.forget_finished(&events);
        events
    }

    fn shutdown(&mut self, grace: Duration) {
        debug!(open = self.connections.len(), "shutting down stream transport");
        for commands in self.connections.values() {
            let _ = commands.send(Command::Close);
        }

        let deadline = Instant::now() + grace;
        while !self.connections.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    open = self.connections.len(),
                    "connections still open after shutdown grace period"
                );
                break;
            }
            // events after shutdown are not routed anywhere
            let _ = self.service(remaining);
        }
        self.connections.clear();
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        // a plain drop panics when the owner sits inside another runtime
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn run_connection(
    handle: ConnectionHandle,
    url: String,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: std_mpsc::Sender<TransportEvent>,
) {
    let connecting = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    tokio::pin!(connecting);

    let outcome = loop {
        tokio::select! {
            outcome = &mut connecting => break outcome,
            command = commands.recv() => match command {
                // nothing to probe before the handshake completes
                Some(Command::Ping) => {}
                Some(Command::Close) | None => {
                    let _ = events.send(TransportEvent::Closed(
                        handle,
                        "closed before handshake completed".to_string(),
                    ));
                    return;
                }
            },
        }
    };

    let ws_stream = match outcome {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::ConnectionError(
                handle,
                format!("WebSocket connection failed: {}", e),
            ));
            return;
        }
        Err(_) => {
            let _ = events.send(TransportEvent::ConnectionError(
                handle,
                "WebSocket connection timeout".to_string(),
            ));
            return;
        }
    };

    let _ = events.send(TransportEvent::Established(handle));
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Ping) => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break format!("Failed to send ping: {}", e);
                    }
                }
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break "closed by client".to_string();
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Received(handle, text.into_bytes()));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(TransportEvent::Received(handle, data));
                }
                Some(Ok(Message::Ping(data))) => {
                    // Binance drops connections that do not answer server pings
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        break format!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = events.send(TransportEvent::Pong(handle));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || "closed by server".to_string(),
                        |f| format!("closed by server: {} {}", f.code, f.reason),
                    );
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => break format!("WebSocket error: {}", e),
                None => break "stream ended".to_string(),
            },
        }
    };

    let _ = events.send(TransportEvent::Closed(handle, reason));
}
