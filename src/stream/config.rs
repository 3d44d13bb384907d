use crate::core::config::ConfigError;
use crate::core::kernel::ws::WsConfig;
use crate::stream::registry::DEFAULT_CAPACITY;
use crate::stream::retry::RetryPolicy;
use crate::stream::supervisor::StreamTarget;
use std::env;
use std::time::Duration;

pub const MAINNET_STREAM_HOST: &str = "stream.binance.com";
pub const TESTNET_STREAM_HOST: &str = "testnet.binance.vision";
pub const STREAM_PROTOCOL: &str = "binance-websocket-api";

/// Settings for the streaming half of the client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    /// Protocol name announced for the connection family
    pub protocol: String,
    /// Longest time one event-loop iteration waits for transport events
    pub slice: Duration,
    /// Maximum number of live endpoints
    pub capacity: usize,
    /// How long teardown waits for connections to close
    pub shutdown_grace: Duration,
    pub retry: RetryPolicy,
    pub ws: WsConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: MAINNET_STREAM_HOST.to_string(),
            port: 9443,
            protocol: STREAM_PROTOCOL.to_string(),
            slice: Duration::from_millis(500),
            capacity: DEFAULT_CAPACITY,
            shutdown_grace: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            ws: WsConfig::default(),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn testnet() -> Self {
        Self {
            host: TESTNET_STREAM_HOST.to_string(),
            port: 443,
            ..Self::default()
        }
    }

    /// Build from environment variables, falling back to defaults
    ///
    /// Recognised variables:
    /// - `BINANCE_TESTNET` (switches host and port to the testnet)
    /// - `BINANCE_STREAM_HOST`, `BINANCE_STREAM_PORT`
    /// - `BINANCE_STREAM_SLICE_MS`
    /// - `BINANCE_STREAM_CAPACITY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let testnet = env::var("BINANCE_TESTNET")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        let mut config = if testnet {
            Self::testnet()
        } else {
            Self::default()
        };

        if let Ok(host) = env::var("BINANCE_STREAM_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var::<u16>("BINANCE_STREAM_PORT")? {
            config.port = port;
        }
        if let Some(slice) = parse_var::<u64>("BINANCE_STREAM_SLICE_MS")? {
            config.slice = Duration::from_millis(slice.max(1));
        }
        if let Some(capacity) = parse_var::<usize>("BINANCE_STREAM_CAPACITY")? {
            config.capacity = capacity;
        }
        Ok(config)
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    #[must_use]
    pub const fn slice(mut self, slice: Duration) -> Self {
        self.slice = slice;
        self
    }

    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn ws(mut self, ws: WsConfig) -> Self {
        self.ws = ws;
        self
    }

    pub fn target(&self) -> StreamTarget {
        StreamTarget {
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidConfiguration(format!("{}={}", key, raw))),
        Err(_) => Ok(None),
    }
}
