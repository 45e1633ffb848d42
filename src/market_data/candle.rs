// =============================================================================
// Candle model — immutable OHLCV record plus timeframe utilities
// =============================================================================

use serde::{Deserialize, Serialize};

/// Timeframe tags accepted by the engine, in ascending duration order.
pub const TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Duration of one candle for `timeframe`, in milliseconds.
///
/// Returns `None` for unknown tags and for `1M`, whose duration is
/// calendar-dependent (28 to 31 days).
pub fn timeframe_duration_ms(timeframe: &str) -> Option<i64> {
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    match timeframe {
        "1m" => Some(MINUTE),
        "3m" => Some(3 * MINUTE),
        "5m" => Some(5 * MINUTE),
        "15m" => Some(15 * MINUTE),
        "30m" => Some(30 * MINUTE),
        "1h" => Some(HOUR),
        "2h" => Some(2 * HOUR),
        "4h" => Some(4 * HOUR),
        "6h" => Some(6 * HOUR),
        "8h" => Some(8 * HOUR),
        "12h" => Some(12 * HOUR),
        "1d" => Some(DAY),
        "3d" => Some(3 * DAY),
        "1w" => Some(7 * DAY),
        _ => None,
    }
}

/// True when `tag` is one of the supported timeframe tags.
pub fn is_valid_timeframe(tag: &str) -> bool {
    TIMEFRAMES.contains(&tag)
}

/// Composite key identifying one candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// A single OHLCV candle. Immutable once committed by the aggregator;
/// `(symbol, timeframe, open_time)` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
    /// Milliseconds since epoch, UTC.
    pub open_time: i64,
    /// Milliseconds since epoch, UTC. `close_time - open_time + 1` equals the
    /// timeframe duration for fixed-width timeframes.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub quote_volume: f64,
    #[serde(default)]
    pub trade_count: u64,
    #[serde(default)]
    pub taker_buy_base: f64,
    #[serde(default)]
    pub taker_buy_quote: f64,
}

impl Candle {
    pub fn key(&self) -> CandleKey {
        CandleKey::new(self.symbol.clone(), self.timeframe.clone())
    }

    /// Price sanity: `low <= open,close <= high` and all values finite.
    pub fn is_price_consistent(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high
    }

    /// True range against the previous close (used by ATR).
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// One raw kline update from the stream: the forming (or just-closed) candle
/// plus the exchange's final flag. The aggregator turns these into committed
/// [`Candle`]s.
#[derive(Debug, Clone)]
pub struct KlineUpdate {
    pub candle: Candle,
    pub is_final: bool,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_table() {
        assert_eq!(timeframe_duration_ms("1m"), Some(60_000));
        assert_eq!(timeframe_duration_ms("1h"), Some(3_600_000));
        assert_eq!(timeframe_duration_ms("1d"), Some(86_400_000));
        assert_eq!(timeframe_duration_ms("1w"), Some(604_800_000));
        // Calendar month has no fixed width.
        assert_eq!(timeframe_duration_ms("1M"), None);
        assert_eq!(timeframe_duration_ms("7m"), None);
    }

    #[test]
    fn timeframe_validation() {
        for tag in TIMEFRAMES {
            assert!(is_valid_timeframe(tag));
        }
        assert!(!is_valid_timeframe("2m"));
        assert!(!is_valid_timeframe(""));
    }

    #[test]
    fn key_display() {
        let key = CandleKey::new("BTCUSDT", "15m");
        assert_eq!(key.to_string(), "BTCUSDT@15m");
    }

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            open_time: 0,
            close_time: 3_599_999,
            open,
            high,
            low,
            close,
            volume: 10.0,
            quote_volume: 0.0,
            trade_count: 0,
            taker_buy_base: 0.0,
            taker_buy_quote: 0.0,
        }
    }

    #[test]
    fn price_consistency() {
        assert!(candle(100.0, 105.0, 95.0, 102.0).is_price_consistent());
        // close above high
        assert!(!candle(100.0, 105.0, 95.0, 106.0).is_price_consistent());
        // open below low
        assert!(!candle(94.0, 105.0, 95.0, 102.0).is_price_consistent());
        // NaN anywhere
        assert!(!candle(100.0, f64::NAN, 95.0, 102.0).is_price_consistent());
    }

    #[test]
    fn true_range_picks_widest_leg() {
        let c = candle(110.0, 115.0, 108.0, 112.0);
        // Plain range is 7, but against a prev close of 95 the gap dominates.
        assert_eq!(c.true_range(112.0), 7.0);
        assert_eq!(c.true_range(95.0), 20.0);
    }
}
