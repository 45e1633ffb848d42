// =============================================================================
// Kline WebSocket client — combined streams with reconnect supervision
// =============================================================================
//
// One connection carries up to 200 `symbol@kline_tf` streams. The reader
// parses each frame and hands the update straight to the aggregator.
// Malformed frames are dropped with a WARNING. Disconnects and transient
// errors are retried forever with exponential backoff (5 s doubling to a
// 60 s cap, reset once a frame parses); an HTTP rejection during the
// handshake means the subscription itself is malformed and is surfaced as
// fatal so the process can exit.
//
// There is no gap repair: after a reconnect the next closed candle seeds the
// new tail of each affected window.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{error, info, warn};

use crate::market_data::aggregator::CandleAggregator;
use crate::market_data::candle::{Candle, CandleKey, KlineUpdate};

const STREAM_ENDPOINT: &str = "wss://stream.binance.com:9443/stream";
/// Exchange-side limit on streams per connection.
pub const MAX_STREAMS_PER_CONNECTION: usize = 200;

const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Stream failure split the supervisor cares about.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The endpoint rejected the subscription during the handshake; retrying
    /// the same URL cannot succeed.
    #[error("subscription rejected: {0}")]
    SubscriptionRejected(String),
    /// Anything retryable: connect failures, read errors, clean remote close.
    #[error("transient stream failure: {0}")]
    Transient(String),
}

/// Build the combined-stream URL for the given `(symbol, timeframe)` pairs.
pub fn build_stream_url(keys: &[CandleKey]) -> String {
    let streams: Vec<String> = keys
        .iter()
        .map(|k| format!("{}@kline_{}", k.symbol.to_lowercase(), k.timeframe))
        .collect();
    format!("{}?streams={}", STREAM_ENDPOINT, streams.join("/"))
}

/// Parse a kline frame. Accepts both the combined-stream envelope
/// (`{"stream": ..., "data": {...}}`) and a bare single-stream payload.
pub fn parse_kline_frame(text: &str) -> Result<KlineUpdate> {
    let root: serde_json::Value = serde_json::from_str(text).context("frame is not JSON")?;
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();
    let k = &data["k"];

    let timeframe = k["i"].as_str().context("missing field k.i")?.to_string();
    let open_time = k["t"].as_i64().context("missing field k.t")?;
    let close_time = k["T"].as_i64().context("missing field k.T")?;
    let is_final = k["x"].as_bool().context("missing field k.x")?;

    let candle = Candle {
        symbol,
        timeframe,
        open_time,
        close_time,
        open: field_f64(&k["o"], "k.o")?,
        high: field_f64(&k["h"], "k.h")?,
        low: field_f64(&k["l"], "k.l")?,
        close: field_f64(&k["c"], "k.c")?,
        volume: field_f64(&k["v"], "k.v")?,
        quote_volume: field_f64(&k["q"], "k.q")?,
        trade_count: k["n"].as_u64().context("missing field k.n")?,
        taker_buy_base: field_f64(&k["V"], "k.V")?,
        taker_buy_quote: field_f64(&k["Q"], "k.Q")?,
    };

    Ok(KlineUpdate { candle, is_final })
}

/// Kline numeric fields arrive as JSON strings.
fn field_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name}: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not an f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Run one connection session. Returns the number of frames successfully
/// parsed during the session, or a fatal error.
async fn run_session(
    url: &str,
    aggregator: &Arc<CandleAggregator>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<u64, StreamError> {
    let (ws_stream, _response) = connect_async(url).await.map_err(classify_connect_error)?;
    info!("kline stream connected");

    let (_write, mut read) = ws_stream.split();
    let mut parsed: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("kline stream shutting down");
                return Ok(parsed);
            }
            frame = read.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match parse_kline_frame(&text) {
                        Ok(update) => {
                            parsed += 1;
                            aggregator.apply(update);
                        }
                        Err(e) => warn!(error = %e, "malformed kline frame dropped"),
                    }
                }
                // Ping/pong/binary frames are handled by tungstenite or
                // carry nothing we consume.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "kline stream read error");
                    if parsed > 0 {
                        return Ok(parsed);
                    }
                    return Err(StreamError::Transient(e.to_string()));
                }
                None => {
                    warn!("kline stream ended by remote");
                    return Ok(parsed);
                }
            }
        }
    }
}

fn classify_connect_error(err: tungstenite::Error) -> StreamError {
    match &err {
        tungstenite::Error::Http(response) if response.status().is_client_error() => {
            StreamError::SubscriptionRejected(format!(
                "handshake rejected with HTTP {}",
                response.status()
            ))
        }
        _ => StreamError::Transient(err.to_string()),
    }
}

/// Supervise one combined-stream connection forever: reconnect with capped
/// exponential backoff, resetting the ladder whenever a session managed to
/// parse at least one frame. Returns only on shutdown or a fatal error.
pub async fn supervise_stream(
    keys: Vec<CandleKey>,
    aggregator: Arc<CandleAggregator>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StreamError> {
    debug_assert!(keys.len() <= MAX_STREAMS_PER_CONNECTION);
    let url = build_stream_url(&keys);
    info!(streams = keys.len(), "kline stream supervisor starting");

    let mut backoff = BACKOFF_INITIAL;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match run_session(&url, &aggregator, &mut shutdown).await {
            Ok(_) if *shutdown.borrow() => return Ok(()),
            Ok(parsed) if parsed > 0 => {
                backoff = BACKOFF_INITIAL;
                info!(frames = parsed, retry_in = ?backoff, "stream session ended; reconnecting");
            }
            Ok(_) => {
                info!(retry_in = ?backoff, "stream session ended without data; reconnecting");
            }
            Err(StreamError::SubscriptionRejected(msg)) => {
                error!(error = %msg, "fatal stream subscription error");
                return Err(StreamError::SubscriptionRejected(msg));
            }
            Err(StreamError::Transient(msg)) => {
                warn!(error = %msg, retry_in = ?backoff, "stream connect failed; backing off");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}
