use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinanceError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Failures the streaming API reports synchronously to its caller.
///
/// Everything that happens inside the event loop (connect failures,
/// malformed frames, handler faults) is recovered or logged there and never
/// surfaces through this type.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("endpoint registry is full ({limit} live endpoints)")]
    Capacity { limit: usize },

    #[error("failed to initialise stream transport: {0}")]
    Init(String),

    #[error("stream controller is not initialised")]
    NotInitialized,

    #[error("event loop is already running")]
    AlreadyRunning,

    #[error("invalid stream path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
}
