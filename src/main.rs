use binance_stream::exchanges::binance::{
    create_binance_rest_client, streams, Kline, KlineEvent, KlineInterval,
};
use binance_stream::{handler_fn, BinanceConfig, BinanceWebsocket, StreamConfig};
use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SYMBOL: &str = "BTCUSDT";
const INTERVAL: KlineInterval = KlineInterval::Minutes1;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let run_for = env::var("DEMO_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(Duration::from_secs(30), Duration::from_secs);

    // Seed the candle cache over REST before the stream starts pushing
    let rest = create_binance_rest_client(&BinanceConfig::read_only())?;
    let seed = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(rest.klines(SYMBOL, INTERVAL, Some(20), None, None))?;
    info!(candles = seed.len(), "loaded kline history");

    let cache: Arc<Mutex<BTreeMap<i64, Kline>>> = Arc::new(Mutex::new(
        seed.into_iter().map(|k| (k.open_time, k)).collect(),
    ));

    let ws = BinanceWebsocket::new(StreamConfig::from_env()?);
    ws.init()?;

    let sink = Arc::clone(&cache);
    ws.connect_endpoint(
        &streams::kline(SYMBOL, INTERVAL),
        handler_fn(move |msg| {
            let event: KlineEvent = serde_json::from_value(msg.clone())?;
            let kline = event.to_kline();
            let mut cache = sink.lock().map_err(|_| anyhow::anyhow!("cache poisoned"))?;
            info!(
                open_time = kline.open_time,
                close = %kline.close,
                is_final = event.kline.is_final,
                "kline update"
            );
            cache.insert(kline.open_time, kline);
            // keep a bounded window
            while cache.len() > 100 {
                cache.pop_first();
            }
            Ok(())
        }),
    )?;

    ws.enter_event_loop(run_for)?;

    let cache = cache.lock().map_err(|_| anyhow::anyhow!("cache poisoned"))?;
    if let Some(last) = cache.values().next_back() {
        info!(candles = cache.len(), last_close = %last.close, "stream finished");
    }
    Ok(())
}
