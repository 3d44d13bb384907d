//! Stream names for the Binance market data feed.
//!
//! Every builder returns a raw stream name such as `btcusdt@kline_1m`;
//! `stream::route_for` turns it into the `/ws/<name>` route. Symbols are
//! lowercased since the feed only accepts lowercase names.

use crate::exchanges::binance::types::KlineInterval;

/// `<symbol>@kline_<interval>`
pub fn kline(symbol: &str, interval: KlineInterval) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval.as_str())
}

/// Partial book depth, `levels` is 5, 10 or 20
pub fn depth(symbol: &str, levels: u8) -> String {
    format!("{}@depth{}", symbol.to_lowercase(), levels)
}

/// Diff depth updates; `fast` selects the 100ms feed
pub fn diff_depth(symbol: &str, fast: bool) -> String {
    let symbol = symbol.to_lowercase();
    if fast {
        format!("{}@depth@100ms", symbol)
    } else {
        format!("{}@depth", symbol)
    }
}

pub fn agg_trade(symbol: &str) -> String {
    format!("{}@aggTrade", symbol.to_lowercase())
}

/// 24h rolling ticker
pub fn ticker(symbol: &str) -> String {
    format!("{}@ticker", symbol.to_lowercase())
}

/// Account updates; the listen key comes from `start_user_data_stream`
pub fn user_data(listen_key: &str) -> String {
    listen_key.to_string()
}

/// One route carrying several streams, `/stream?streams=a/b/c`
pub fn combined<S: AsRef<str>>(streams: &[S]) -> String {
    let joined = streams
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("/");
    format!("/stream?streams={}", joined)
}
