/// Transport kernel shared by the REST and streaming halves
///
/// Nothing in here knows about endpoints or subscriptions; it only moves
/// bytes and signs requests.
///
/// ## Transport Layer
/// - `RestClient`: HTTP client interface, implemented by `ReqwestRest`
/// - `Transport`: streaming transport context, implemented by
///   `TungsteniteTransport`
///
/// ## Authentication
/// - `Signer`: pluggable request signing
/// - `HmacSigner`: HMAC-SHA256 query signing with the `X-MBX-APIKEY` header
///
/// ## Message Handling
/// - `FrameCodec`: turns raw stream frames into messages (`JsonCodec`)
///
/// ```rust,no_run
/// use binance_stream::core::kernel::*;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), binance_stream::BinanceError> {
/// let signer = Arc::new(HmacSigner::new("key".to_string(), "secret".to_string()));
/// let rest = RestClientBuilder::new(RestClientConfig::new(
///     "https://api.binance.com".to_string(),
/// ))
/// .with_signer(signer)
/// .build()?;
/// # let _ = rest;
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::{FrameCodec, JsonCodec};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, Security};
pub use signer::{HmacSigner, SignatureResult, Signer, API_KEY_HEADER};
pub use ws::{
    ConnectRequest, ConnectionHandle, Transport, TransportEvent, TransportFactory,
    TungsteniteTransport, WsConfig,
};
