pub mod rest;
pub mod streams;
pub mod types;

use crate::core::config::BinanceConfig;
use crate::core::errors::BinanceError;
use crate::core::kernel::{HmacSigner, ReqwestRest, RestClientBuilder, RestClientConfig};
use std::sync::Arc;

// Re-export main types for easier importing
pub use rest::{AggTradeRange, BinanceRestClient};
pub use types::{
    AggTrade, BookTicker, DepthSnapshot, ExchangeInfo, Kline, KlineEvent, KlineEventData,
    KlineInterval, ListenKey, LotSize, NotionalFilter, PriceFilter, PriceLevel, ServerTime,
    SymbolFilter, SymbolInfo, SymbolPrice, Ticker24hr,
};

/// Create a Binance REST client; requests are signed when the config
/// carries credentials
pub fn create_binance_rest_client(
    config: &BinanceConfig,
) -> Result<BinanceRestClient<ReqwestRest>, BinanceError> {
    let rest_config = RestClientConfig::new(config.rest_url());
    let mut rest_builder = RestClientBuilder::new(rest_config);

    // Add authentication if credentials are provided
    if config.has_credentials() {
        let mut signer = HmacSigner::new(
            config.api_key().to_string(),
            config.secret_key().to_string(),
        );
        if let Some(recv_window) = config.recv_window {
            signer = signer.with_recv_window(recv_window);
        }
        rest_builder = rest_builder.with_signer(Arc::new(signer));
    }

    Ok(BinanceRestClient::new(rest_builder.build()?))
}
