use crate::core::errors::BinanceError;
use crate::core::kernel::{RestClient, Security};
use crate::exchanges::binance::types::{
    AggTrade, BookTicker, DepthSnapshot, ExchangeInfo, Kline, KlineInterval, ListenKey, LotSize,
    PriceFilter, ServerTime, SymbolInfo, SymbolPrice, Ticker24hr,
};
use rust_decimal::Decimal;
use tracing::instrument;

const USER_DATA_STREAM: &str = "/api/v3/userDataStream";

/// Widest `startTime..endTime` window the aggregate trades endpoint accepts
pub const AGG_TRADES_MAX_WINDOW_MS: i64 = 60 * 60 * 1000;

/// Which slice of aggregate trades to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggTradeRange {
    /// Trades from this aggregate id onwards (inclusive)
    FromId(u64),
    /// Trades within `[start_time, end_time]`, in milliseconds; at most one hour apart
    Between { start_time: i64, end_time: i64 },
}

fn check_limit(what: &str, limit: u32, max: u32) -> Result<(), BinanceError> {
    if limit == 0 || limit > max {
        return Err(BinanceError::InvalidParameters(format!(
            "{} limit must be within 1..={}, got {}",
            what, max, limit
        )));
    }
    Ok(())
}

/// Depth limits the order book endpoint accepts
pub const DEPTH_LIMITS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// Thin typed wrapper around `RestClient` for the Binance spot API
pub struct BinanceRestClient<R: RestClient> {
    client: R,
}

impl<R: RestClient> BinanceRestClient<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &R {
        &self.client
    }

    /// Get server time
    pub async fn server_time(&self) -> Result<ServerTime, BinanceError> {
        self.client
            .get_json("/api/v3/time", &[], Security::None)
            .await
    }

    /// Get klines/candlestick data
    #[instrument(skip(self))]
    pub async fn klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: Option<u32>,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Kline>, BinanceError> {
        let mut params = vec![("symbol", symbol), ("interval", interval.as_str())];

        let limit_str;
        let start_time_str;
        let end_time_str;

        if let Some(limit) = limit {
            check_limit("kline", limit, 1000)?;
            limit_str = limit.to_string();
            params.push(("limit", limit_str.as_str()));
        }
        if let Some(start_time) = start_time {
            start_time_str = start_time.to_string();
            params.push(("startTime", start_time_str.as_str()));
        }
        if let Some(end_time) = end_time {
            end_time_str = end_time.to_string();
            params.push(("endTime", end_time_str.as_str()));
        }

        self.client
            .get_json("/api/v3/klines", &params, Security::None)
            .await
    }

    /// Get an order book snapshot
    #[instrument(skip(self))]
    pub async fn depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot, BinanceError> {
        if !DEPTH_LIMITS.contains(&limit) {
            return Err(BinanceError::InvalidParameters(format!(
                "depth limit must be one of {:?}, got {}",
                DEPTH_LIMITS, limit
            )));
        }
        let limit_str = limit.to_string();
        self.client
            .get_json(
                "/api/v3/depth",
                &[("symbol", symbol), ("limit", limit_str.as_str())],
                Security::None,
            )
            .await
    }

    /// Get trading rules and symbol information for every symbol
    pub async fn exchange_info(&self) -> Result<ExchangeInfo, BinanceError> {
        self.client
            .get_json("/api/v3/exchangeInfo", &[], Security::None)
            .await
    }

    /// Get trading rules for one symbol
    #[instrument(skip(self))]
    pub async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BinanceError> {
        let symbol = symbol.to_ascii_uppercase();
        let info: ExchangeInfo = self
            .client
            .get_json(
                "/api/v3/exchangeInfo",
                &[("symbol", symbol.as_str())],
                Security::None,
            )
            .await?;
        info.symbol(&symbol).cloned().ok_or_else(|| {
            BinanceError::InvalidParameters(format!("unknown symbol: {}", symbol))
        })
    }

    /// Quantity rule (`LOT_SIZE` filter) of a symbol
    pub async fn lot_size(&self, symbol: &str) -> Result<LotSize, BinanceError> {
        let info = self.symbol_info(symbol).await?;
        info.lot_size()
            .copied()
            .ok_or_else(|| missing_filter(&info.symbol, "LOT_SIZE"))
    }

    /// Price rule (`PRICE_FILTER`) of a symbol
    pub async fn tick_size(&self, symbol: &str) -> Result<PriceFilter, BinanceError> {
        let info = self.symbol_info(symbol).await?;
        info.price_filter()
            .copied()
            .ok_or_else(|| missing_filter(&info.symbol, "PRICE_FILTER"))
    }

    /// Minimum order value of a symbol
    pub async fn min_notional(&self, symbol: &str) -> Result<Decimal, BinanceError> {
        let info = self.symbol_info(symbol).await?;
        info.min_notional()
            .ok_or_else(|| missing_filter(&info.symbol, "MIN_NOTIONAL"))
    }

    /// Latest price of one symbol
    pub async fn price(&self, symbol: &str) -> Result<SymbolPrice, BinanceError> {
        self.client
            .get_json("/api/v3/ticker/price", &[("symbol", symbol)], Security::None)
            .await
    }

    /// Latest price of every symbol
    pub async fn all_prices(&self) -> Result<Vec<SymbolPrice>, BinanceError> {
        self.client
            .get_json("/api/v3/ticker/price", &[], Security::None)
            .await
    }

    /// Best bid and ask of one symbol
    pub async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, BinanceError> {
        self.client
            .get_json(
                "/api/v3/ticker/bookTicker",
                &[("symbol", symbol)],
                Security::None,
            )
            .await
    }

    pub async fn all_book_tickers(&self) -> Result<Vec<BookTicker>, BinanceError> {
        self.client
            .get_json("/api/v3/ticker/bookTicker", &[], Security::None)
            .await
    }

    /// Get compressed, aggregate trades
    #[instrument(skip(self))]
    pub async fn agg_trades(
        &self,
        symbol: &str,
        range: AggTradeRange,
        limit: Option<u32>,
    ) -> Result<Vec<AggTrade>, BinanceError> {
        let mut params: Vec<(&str, String)> = vec![("symbol", symbol.to_string())];
        match range {
            AggTradeRange::FromId(from_id) => params.push(("fromId", from_id.to_string())),
            AggTradeRange::Between {
                start_time,
                end_time,
            } => {
                if end_time < start_time || end_time - start_time > AGG_TRADES_MAX_WINDOW_MS {
                    return Err(BinanceError::InvalidParameters(format!(
                        "aggregate trade window must be ordered and at most one hour, got {}..{}",
                        start_time, end_time
                    )));
                }
                params.push(("startTime", start_time.to_string()));
                params.push(("endTime", end_time.to_string()));
            }
        }
        if let Some(limit) = limit {
            check_limit("aggregate trade", limit, 1000)?;
            params.push(("limit", limit.to_string()));
        }

        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.client
            .get_json("/api/v3/aggTrades", &params, Security::None)
            .await
    }

    /// 24 hour rolling window statistics of one symbol
    pub async fn ticker_24hr(&self, symbol: &str) -> Result<Ticker24hr, BinanceError> {
        self.client
            .get_json("/api/v3/ticker/24hr", &[("symbol", symbol)], Security::None)
            .await
    }

    /// Create a listen key for the user data stream
    pub async fn start_user_data_stream(&self) -> Result<ListenKey, BinanceError> {
        self.client
            .post_json(USER_DATA_STREAM, &[], Security::ApiKey)
            .await
    }

    /// Extend a listen key's validity by 60 minutes
    pub async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), BinanceError> {
        self.client
            .put(USER_DATA_STREAM, &[("listenKey", listen_key)], Security::ApiKey)
            .await?;
        Ok(())
    }

    pub async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), BinanceError> {
        self.client
            .delete(USER_DATA_STREAM, &[("listenKey", listen_key)], Security::ApiKey)
            .await?;
        Ok(())
    }
}

fn missing_filter(symbol: &str, filter: &str) -> BinanceError {
    BinanceError::Other(format!("{} has no {} filter", symbol, filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::Method;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    type Call = (String, String, Vec<(String, String)>, Security);

    /// Records every call and answers with a canned body
    struct CannedRest {
        body: Value,
        calls: Mutex<Vec<Call>>,
    }

    impl CannedRest {
        fn new(body: Value) -> Self {
            Self {
                body,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, method: &str, endpoint: &str, params: &[(&str, &str)], security: Security) {
            self.calls.lock().unwrap().push((
                method.to_string(),
                endpoint.to_string(),
                params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                security,
            ));
        }

        fn last_call(&self) -> Call {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl RestClient for CannedRest {
        async fn get(&self, e: &str, p: &[(&str, &str)], s: Security) -> Result<Value, BinanceError> {
            self.record("GET", e, p, s);
            Ok(self.body.clone())
        }

        async fn get_json<T: DeserializeOwned>(
            &self,
            e: &str,
            p: &[(&str, &str)],
            s: Security,
        ) -> Result<T, BinanceError> {
            self.record("GET", e, p, s);
            Ok(serde_json::from_value(self.body.clone())?)
        }

        async fn post(&self, e: &str, p: &[(&str, &str)], s: Security) -> Result<Value, BinanceError> {
            self.record("POST", e, p, s);
            Ok(self.body.clone())
        }

        async fn post_json<T: DeserializeOwned>(
            &self,
            e: &str,
            p: &[(&str, &str)],
            s: Security,
        ) -> Result<T, BinanceError> {
            self.record("POST", e, p, s);
            Ok(serde_json::from_value(self.body.clone())?)
        }

        async fn put(&self, e: &str, p: &[(&str, &str)], s: Security) -> Result<Value, BinanceError> {
            self.record("PUT", e, p, s);
            Ok(self.body.clone())
        }

        async fn delete(&self, e: &str, p: &[(&str, &str)], s: Security) -> Result<Value, BinanceError> {
            self.record("DELETE", e, p, s);
            Ok(self.body.clone())
        }

        async fn delete_json<T: DeserializeOwned>(
            &self,
            e: &str,
            p: &[(&str, &str)],
            s: Security,
        ) -> Result<T, BinanceError> {
            self.record("DELETE", e, p, s);
            Ok(serde_json::from_value(self.body.clone())?)
        }

        async fn signed_request(
            &self,
            method: Method,
            e: &str,
            p: &[(&str, &str)],
        ) -> Result<Value, BinanceError> {
            self.record(method.as_str(), e, p, Security::Signed);
            Ok(self.body.clone())
        }
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_klines_builds_query() {
        let client = BinanceRestClient::new(CannedRest::new(json!([[
            1, "1.0", "2.0", "0.5", "1.5", "10", 2, "15", 3, "5", "7.5", "0"
        ]])));

        let klines = client
            .klines("BTCUSDT", KlineInterval::Minutes5, Some(10), Some(1000), None)
            .await
            .unwrap();
        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].trades, 3);

        let (method, endpoint, params, security) = client.inner().last_call();
        assert_eq!(method, "GET");
        assert_eq!(endpoint, "/api/v3/klines");
        assert_eq!(
            params,
            pairs(&[
                ("symbol", "BTCUSDT"),
                ("interval", "5m"),
                ("limit", "10"),
                ("startTime", "1000")
            ])
        );
        assert_eq!(security, Security::None);
    }

    #[tokio::test]
    async fn test_limits_are_validated_before_sending() {
        let client = BinanceRestClient::new(CannedRest::new(json!({})));
        assert!(matches!(
            client.depth("BTCUSDT", 7).await,
            Err(BinanceError::InvalidParameters(_))
        ));
        assert!(matches!(
            client
                .klines("BTCUSDT", KlineInterval::Hours1, Some(0), None, None)
                .await,
            Err(BinanceError::InvalidParameters(_))
        ));
        assert!(client.inner().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listen_key_lifecycle_uses_api_key_security() {
        let client = BinanceRestClient::new(CannedRest::new(json!({"listenKey": "abc"})));

        let key = client.start_user_data_stream().await.unwrap();
        assert_eq!(key.listen_key, "abc");
        let (method, endpoint, _, security) = client.inner().last_call();
        assert_eq!((method.as_str(), endpoint.as_str()), ("POST", USER_DATA_STREAM));
        assert_eq!(security, Security::ApiKey);

        client.keepalive_user_data_stream("abc").await.unwrap();
        let (method, _, params, _) = client.inner().last_call();
        assert_eq!(method, "PUT");
        assert_eq!(params, pairs(&[("listenKey", "abc")]));

        client.close_user_data_stream("abc").await.unwrap();
        assert_eq!(client.inner().last_call().0, "DELETE");
    }

    #[tokio::test]
    async fn test_server_time() {
        let client = BinanceRestClient::new(CannedRest::new(json!({"serverTime": 42})));
        assert_eq!(client.server_time().await.unwrap().server_time, 42);
    }

    #[tokio::test]
    async fn test_symbol_filters_come_from_exchange_info() {
        let client = BinanceRestClient::new(CannedRest::new(json!({
            "timezone": "UTC",
            "serverTime": 1,
            "symbols": [{
                "symbol": "BNBBTC",
                "status": "TRADING",
                "baseAsset": "BNB",
                "quoteAsset": "BTC",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.0000001",
                     "maxPrice": "100", "tickSize": "0.0000001"},
                    {"filterType": "LOT_SIZE", "minQty": "0.01",
                     "maxQty": "900000", "stepSize": "0.01"},
                    {"filterType": "MIN_NOTIONAL", "minNotional": "0.0001"}
                ]
            }]
        })));

        let lot = client.lot_size("bnbbtc").await.unwrap();
        assert_eq!(lot.step_size, Decimal::new(1, 2));
        let (_, endpoint, params, _) = client.inner().last_call();
        assert_eq!(endpoint, "/api/v3/exchangeInfo");
        assert_eq!(params, pairs(&[("symbol", "BNBBTC")]));

        let prices = client.tick_size("BNBBTC").await.unwrap();
        assert_eq!(prices.tick_size, Decimal::new(1, 7));
        assert_eq!(client.min_notional("BNBBTC").await.unwrap(), Decimal::new(1, 4));

        assert!(matches!(
            client.symbol_info("ETHBTC").await,
            Err(BinanceError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_filter_is_an_error() {
        let client = BinanceRestClient::new(CannedRest::new(json!({
            "timezone": "UTC",
            "serverTime": 1,
            "symbols": [{"symbol": "BNBBTC", "status": "BREAK",
                         "baseAsset": "BNB", "quoteAsset": "BTC", "filters": []}]
        })));
        assert!(matches!(
            client.lot_size("BNBBTC").await,
            Err(BinanceError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_agg_trades_builds_query() {
        let client = BinanceRestClient::new(CannedRest::new(json!([{
            "a": 26129, "p": "0.01633102", "q": "4.70443515", "f": 27781,
            "l": 27781, "T": 1498793709153_i64, "m": true, "M": true
        }])));

        let trades = client
            .agg_trades("BTCUSDT", AggTradeRange::FromId(26_000), Some(50))
            .await
            .unwrap();
        assert_eq!(trades[0].id, 26_129);
        let (_, endpoint, params, _) = client.inner().last_call();
        assert_eq!(endpoint, "/api/v3/aggTrades");
        assert_eq!(
            params,
            pairs(&[("symbol", "BTCUSDT"), ("fromId", "26000"), ("limit", "50")])
        );

        let range = AggTradeRange::Between {
            start_time: 1_000,
            end_time: 61_000,
        };
        client.agg_trades("BTCUSDT", range, None).await.unwrap();
        let (_, _, params, _) = client.inner().last_call();
        assert_eq!(
            params,
            pairs(&[
                ("symbol", "BTCUSDT"),
                ("startTime", "1000"),
                ("endTime", "61000")
            ])
        );
    }

    #[tokio::test]
    async fn test_agg_trades_rejects_bad_windows() {
        let client = BinanceRestClient::new(CannedRest::new(json!([])));
        for (start_time, end_time) in [(10, 5), (0, AGG_TRADES_MAX_WINDOW_MS + 1)] {
            let range = AggTradeRange::Between {
                start_time,
                end_time,
            };
            assert!(matches!(
                client.agg_trades("BTCUSDT", range, None).await,
                Err(BinanceError::InvalidParameters(_))
            ));
        }
        assert!(matches!(
            client
                .agg_trades("BTCUSDT", AggTradeRange::FromId(1), Some(1001))
                .await,
            Err(BinanceError::InvalidParameters(_))
        ));
        assert!(client.inner().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ticker_endpoints() {
        let client = BinanceRestClient::new(CannedRest::new(json!({
            "symbol": "LTCBTC", "price": "4.00000200"
        })));
        let price = client.price("LTCBTC").await.unwrap();
        assert_eq!(price.price, Decimal::new(4_000_002, 6));
        let (_, endpoint, params, _) = client.inner().last_call();
        assert_eq!(endpoint, "/api/v3/ticker/price");
        assert_eq!(params, pairs(&[("symbol", "LTCBTC")]));

        let client = BinanceRestClient::new(CannedRest::new(json!([
            {"symbol": "LTCBTC", "bidPrice": "4.0", "bidQty": "431",
             "askPrice": "4.000002", "askQty": "9"},
            {"symbol": "ETHBTC", "bidPrice": "0.07", "bidQty": "1",
             "askPrice": "0.0701", "askQty": "2"}
        ])));
        let tickers = client.all_book_tickers().await.unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[1].symbol, "ETHBTC");
        let (_, endpoint, params, _) = client.inner().last_call();
        assert_eq!(endpoint, "/api/v3/ticker/bookTicker");
        assert!(params.is_empty());
    }
}
