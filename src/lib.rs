pub mod core;
pub mod exchanges;
pub mod stream;

pub use core::{
    config::BinanceConfig,
    errors::{BinanceError, StreamError},
};
pub use exchanges::binance::BinanceRestClient;
pub use stream::{handler_fn, BinanceWebsocket, StreamConfig};
