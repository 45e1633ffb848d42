// =============================================================================
// History client — REST warm-start fetch of recent closed candles
// =============================================================================
//
// Fetches the most recent klines for one (symbol, timeframe) so windows are
// analysis-ready before the first live close. The REST endpoint appends the
// currently forming candle to the response; that row is trimmed here so the
// preloaded tail is always a truly closed candle and the live stream's replay
// of the forming candle commits exactly once.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::market_data::candle::{Candle, CandleKey};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
/// Hard cap the klines endpoint enforces on `limit`.
pub const MAX_FETCH_LIMIT: u32 = 1500;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct HistoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HistoryClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at a different endpoint (tests, mirrors).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetch up to `limit` most-recent **closed** candles for `key`, oldest
    /// first. Retries transient failures with exponential backoff; the caller
    /// decides whether an empty warm start is acceptable.
    pub async fn fetch_closed(&self, key: &CandleKey, limit: u32) -> Result<Vec<Candle>> {
        let limit = limit.min(MAX_FETCH_LIMIT);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, key.symbol, key.timeframe, limit
        );

        let mut backoff = RETRY_BACKOFF;
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_once(&url).await {
                Ok(rows) => {
                    let candles = parse_klines(&rows, key, Utc::now().timestamp_millis());
                    info!(key = %key, count = candles.len(), "history fetched");
                    return Ok(candles);
                }
                Err(e) => {
                    warn!(key = %key, attempt, error = %e, "history fetch failed");
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt was made"))
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<serde_json::Value>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("klines request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("klines fetch returned {status}: {body}");
        }

        resp.json().await.context("failed to parse klines response")
    }
}

impl Default for HistoryClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the klines array-of-arrays response into candles, oldest first.
///
/// Rows are
/// `[open_time, o, h, l, c, v, close_time, quote_vol, n, taker_base, taker_quote, _]`
/// with prices as strings. Malformed rows are skipped; the trailing row is
/// dropped when its `close_time` is still in the future (forming candle).
pub fn parse_klines(rows: &[serde_json::Value], key: &CandleKey, now_ms: i64) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| {
            let arr = row.as_array()?;
            if arr.len() < 11 {
                return None;
            }
            Some(Candle {
                symbol: key.symbol.clone(),
                timeframe: key.timeframe.clone(),
                open_time: arr[0].as_i64()?,
                close_time: arr[6].as_i64()?,
                open: arr[1].as_str()?.parse().ok()?,
                high: arr[2].as_str()?.parse().ok()?,
                low: arr[3].as_str()?.parse().ok()?,
                close: arr[4].as_str()?.parse().ok()?,
                volume: arr[5].as_str()?.parse().ok()?,
                quote_volume: arr[7].as_str()?.parse().ok()?,
                trade_count: arr[8].as_u64()?,
                taker_buy_base: arr[9].as_str()?.parse().ok()?,
                taker_buy_quote: arr[10].as_str()?.parse().ok()?,
            })
        })
        .collect();

    let before = candles.len();
    candles.retain(|c| c.close_time <= now_ms);
    if candles.len() < before {
        debug!(key = %key, "trimmed forming candle from history tail");
    }

    candles.sort_by_key(|c| c.open_time);
    candles
}
