use crate::core::errors::BinanceError;
use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candlestick interval as Binance spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1s")]
    Seconds1,

    #[serde(rename = "1m")]
    Minutes1,
    #[serde(rename = "3m")]
    Minutes3,
    #[serde(rename = "5m")]
    Minutes5,
    #[serde(rename = "15m")]
    Minutes15,
    #[serde(rename = "30m")]
    Minutes30,

    #[serde(rename = "1h")]
    Hours1,
    #[serde(rename = "2h")]
    Hours2,
    #[serde(rename = "4h")]
    Hours4,
    #[serde(rename = "6h")]
    Hours6,
    #[serde(rename = "8h")]
    Hours8,
    #[serde(rename = "12h")]
    Hours12,

    #[serde(rename = "1d")]
    Days1,
    #[serde(rename = "3d")]
    Days3,

    #[serde(rename = "1w")]
    Weeks1,

    #[serde(rename = "1M")]
    Months1,
}

impl KlineInterval {
    pub const ALL: [Self; 16] = [
        Self::Seconds1,
        Self::Minutes1,
        Self::Minutes3,
        Self::Minutes5,
        Self::Minutes15,
        Self::Minutes30,
        Self::Hours1,
        Self::Hours2,
        Self::Hours4,
        Self::Hours6,
        Self::Hours8,
        Self::Hours12,
        Self::Days1,
        Self::Days3,
        Self::Weeks1,
        Self::Months1,
    ];

    /// Binance format (e.g., "1m", "1h", "1M")
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds1 => "1s",
            Self::Minutes1 => "1m",
            Self::Minutes3 => "3m",
            Self::Minutes5 => "5m",
            Self::Minutes15 => "15m",
            Self::Minutes30 => "30m",
            Self::Hours1 => "1h",
            Self::Hours2 => "2h",
            Self::Hours4 => "4h",
            Self::Hours6 => "6h",
            Self::Hours8 => "8h",
            Self::Hours12 => "12h",
            Self::Days1 => "1d",
            Self::Days3 => "3d",
            Self::Weeks1 => "1w",
            Self::Months1 => "1M",
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = BinanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| BinanceError::InvalidParameters(format!("unknown kline interval: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ServerTime {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenKey {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

/// One candle as returned by `GET /api/v3/klines`.
///
/// The REST API sends each candle as a positional 12-element array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawKline")]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_volume: Decimal,
    pub trades: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

#[derive(Deserialize)]
struct RawKline(
    i64,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
    i64,
    Decimal,
    u64,
    Decimal,
    Decimal,
    IgnoredAny,
);

impl From<RawKline> for Kline {
    fn from(raw: RawKline) -> Self {
        Self {
            open_time: raw.0,
            open: raw.1,
            high: raw.2,
            low: raw.3,
            close: raw.4,
            volume: raw.5,
            close_time: raw.6,
            quote_volume: raw.7,
            trades: raw.8,
            taker_buy_base_volume: raw.9,
            taker_buy_quote_volume: raw.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(Decimal, Decimal)")]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, quantity): (Decimal, Decimal)) -> Self {
        Self { price, quantity }
    }
}

/// `GET /api/v3/depth` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// `GET /api/v3/exchangeInfo` response, reduced to the symbol catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub timezone: String,
    pub server_time: i64,
    pub symbols: Vec<SymbolInfo>,
}

impl ExchangeInfo {
    /// Look a symbol up, ignoring ASCII case
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbols
            .iter()
            .find(|info| info.symbol.eq_ignore_ascii_case(symbol))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl SymbolInfo {
    pub fn lot_size(&self) -> Option<&LotSize> {
        self.filters.iter().find_map(|filter| match filter {
            SymbolFilter::LotSize(lot) => Some(lot),
            _ => None,
        })
    }

    pub fn price_filter(&self) -> Option<&PriceFilter> {
        self.filters.iter().find_map(|filter| match filter {
            SymbolFilter::Price(price) => Some(price),
            _ => None,
        })
    }

    /// Minimum order value; newer symbols carry `NOTIONAL` instead of `MIN_NOTIONAL`
    pub fn min_notional(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|filter| match filter {
            SymbolFilter::MinNotional(n) | SymbolFilter::Notional(n) => Some(n.min_notional),
            _ => None,
        })
    }
}

/// Trading rules attached to a symbol; only the ones used here are typed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price(PriceFilter),
    #[serde(rename = "LOT_SIZE")]
    LotSize(LotSize),
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional(NotionalFilter),
    #[serde(rename = "NOTIONAL")]
    Notional(NotionalFilter),
    #[serde(other)]
    Other,
}

/// A valid price satisfies `min_price <= price <= max_price` and
/// `(price - min_price) % tick_size == 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub tick_size: Decimal,
}

/// Same rule as [`PriceFilter`], applied to order quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSize {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionalFilter {
    pub min_notional: Decimal,
    pub max_notional: Option<Decimal>,
}

/// `GET /api/v3/ticker/price` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SymbolPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// Best bid and ask, `GET /api/v3/ticker/bookTicker`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
    pub symbol: String,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

/// `GET /api/v3/aggTrades` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggTrade {
    #[serde(rename = "a")]
    pub id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    pub timestamp: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
    #[serde(rename = "M")]
    pub is_best_match: bool,
}

/// Rolling 24h statistics, `GET /api/v3/ticker/24hr`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hr {
    pub symbol: String,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub weighted_avg_price: Decimal,
    pub prev_close_price: Decimal,
    pub last_price: Decimal,
    pub last_qty: Decimal,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub open_time: i64,
    pub close_time: i64,
    /// -1 when there were no trades in the window
    pub first_id: i64,
    pub last_id: i64,
    pub count: u64,
}

// WebSocket Types

/// `<symbol>@kline_<interval>` push payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlineEventData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KlineEventData {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: KlineInterval,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
    #[serde(rename = "n")]
    pub trades: u64,
    #[serde(rename = "V")]
    pub taker_buy_base_volume: Decimal,
    #[serde(rename = "Q")]
    pub taker_buy_quote_volume: Decimal,
    /// Whether this candle is closed
    #[serde(rename = "x")]
    pub is_final: bool,
}

impl KlineEvent {
    pub fn to_kline(&self) -> Kline {
        let k = &self.kline;
        Kline {
            open_time: k.open_time,
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            volume: k.volume,
            close_time: k.close_time,
            quote_volume: k.quote_volume,
            trades: k.trades,
            taker_buy_base_volume: k.taker_buy_base_volume,
            taker_buy_quote_volume: k.taker_buy_quote_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_interval_formatting() {
        assert_eq!(KlineInterval::Minutes1.to_string(), "1m");
        assert_eq!(KlineInterval::Months1.as_str(), "1M");
        assert_eq!("4h".parse::<KlineInterval>().unwrap(), KlineInterval::Hours4);
        assert!("7m".parse::<KlineInterval>().is_err());
        for interval in KlineInterval::ALL {
            let json = serde_json::to_string(&interval).unwrap();
            assert_eq!(json, format!("\"{}\"", interval.as_str()));
        }
    }

    #[test]
    fn test_kline_from_rest_array() {
        let body = r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100",
            "148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397",
            "28.46694368","0"]]"#;
        let klines: Vec<Kline> = serde_json::from_str(body).unwrap();
        assert_eq!(klines.len(), 1);
        let k = &klines[0];
        assert_eq!(k.open_time, 1_499_040_000_000);
        assert_eq!(k.high, dec("0.8"));
        assert_eq!(k.close_time, 1_499_644_799_999);
        assert_eq!(k.trades, 308);
        assert_eq!(k.taker_buy_quote_volume, dec("28.46694368"));
    }

    #[test]
    fn test_depth_snapshot() {
        let body = r#"{"lastUpdateId":1027024,
            "bids":[["4.00000000","431.00000000"]],
            "asks":[["4.00000200","12.00000000"],["4.1","1"]]}"#;
        let depth: DepthSnapshot = serde_json::from_str(body).unwrap();
        assert_eq!(depth.last_update_id, 1_027_024);
        assert_eq!(depth.bids[0].price, dec("4"));
        assert_eq!(depth.bids[0].quantity, dec("431"));
        assert_eq!(depth.asks.len(), 2);
    }

    #[test]
    fn test_kline_event() {
        let body = r#"{"e":"kline","E":123456789,"s":"BNBBTC","k":{
            "t":123400000,"T":123460000,"s":"BNBBTC","i":"1m","f":100,"L":200,
            "o":"0.0010","c":"0.0020","h":"0.0025","l":"0.0015","v":"1000",
            "n":100,"x":false,"q":"1.0000","V":"500","Q":"0.500","B":"123456"}}"#;
        let event: KlineEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.symbol, "BNBBTC");
        assert_eq!(event.kline.interval, KlineInterval::Minutes1);
        assert!(!event.kline.is_final);

        let kline = event.to_kline();
        assert_eq!(kline.open_time, 123_400_000);
        assert_eq!(kline.close, dec("0.002"));
        assert_eq!(kline.taker_buy_base_volume, dec("500"));
    }

    #[test]
    fn test_listen_key_and_server_time() {
        let key: ListenKey = serde_json::from_str(r#"{"listenKey":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1"}"#).unwrap();
        assert!(key.listen_key.starts_with("pqia91"));
        let time: ServerTime = serde_json::from_str(r#"{"serverTime":1499827319559}"#).unwrap();
        assert_eq!(time.server_time, 1_499_827_319_559);
    }

    #[test]
    fn test_exchange_info_filters() {
        let body = r#"{"timezone":"UTC","serverTime":1565246363776,"rateLimits":[],
            "symbols":[{"symbol":"ETHBTC","status":"TRADING","baseAsset":"ETH",
              "quoteAsset":"BTC","baseAssetPrecision":8,"filters":[
                {"filterType":"PRICE_FILTER","minPrice":"0.00000100",
                 "maxPrice":"100000.00000000","tickSize":"0.00000100"},
                {"filterType":"LOT_SIZE","minQty":"0.00100000",
                 "maxQty":"100000.00000000","stepSize":"0.00100000"},
                {"filterType":"ICEBERG_PARTS","limit":10},
                {"filterType":"NOTIONAL","minNotional":"0.00010000",
                 "applyMinToMarket":true,"maxNotional":"9000000.00000000"}]}]}"#;
        let info: ExchangeInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.server_time, 1_565_246_363_776);

        let eth = info.symbol("ethbtc").unwrap();
        assert_eq!(eth.base_asset, "ETH");
        assert_eq!(eth.filters.len(), 4);
        assert_eq!(eth.filters[2], SymbolFilter::Other);

        let lot = eth.lot_size().unwrap();
        assert_eq!(lot.min_qty, dec("0.001"));
        assert_eq!(lot.step_size, dec("0.001"));
        assert_eq!(eth.price_filter().unwrap().tick_size, dec("0.000001"));
        assert_eq!(eth.min_notional(), Some(dec("0.0001")));
        assert!(info.symbol("BNBBTC").is_none());
    }

    #[test]
    fn test_ticker_payloads() {
        let book: BookTicker = serde_json::from_str(
            r#"{"symbol":"LTCBTC","bidPrice":"4.00000000","bidQty":"431.00000000",
                "askPrice":"4.00000200","askQty":"9.00000000"}"#,
        )
        .unwrap();
        assert_eq!(book.ask_price, dec("4.000002"));

        let trades: Vec<AggTrade> = serde_json::from_str(
            r#"[{"a":26129,"p":"0.01633102","q":"4.70443515","f":27781,"l":27781,
                 "T":1498793709153,"m":true,"M":true}]"#,
        )
        .unwrap();
        assert_eq!(trades[0].id, 26_129);
        assert!(trades[0].is_buyer_maker);

        let ticker: Ticker24hr = serde_json::from_str(
            r#"{"symbol":"BNBBTC","priceChange":"-94.99999800","priceChangePercent":"-95.960",
                "weightedAvgPrice":"0.29628482","prevClosePrice":"0.10002000",
                "lastPrice":"4.00000200","lastQty":"200.00000000","bidPrice":"4.00000000",
                "bidQty":"100.00000000","askPrice":"4.00000200","askQty":"100.00000000",
                "openPrice":"99.00000000","highPrice":"100.00000000","lowPrice":"0.10000000",
                "volume":"8913.30000000","quoteVolume":"15.30000000","openTime":1499783499040,
                "closeTime":1499869899040,"firstId":28385,"lastId":28460,"count":76}"#,
        )
        .unwrap();
        assert_eq!(ticker.price_change_percent, dec("-95.96"));
        assert_eq!(ticker.count, 76);
    }
}
