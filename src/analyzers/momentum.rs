// =============================================================================
// Momentum analyzers — RSI extremes and MACD histogram crossovers
// =============================================================================

use crate::analyzers::CandleAnalyzer;
use crate::indicators::{macd_last_two, rsi_last};
use crate::market_data::{Candle, CandleKey};
use crate::types::{AnalyzerKind, AnalyzerResult, Direction};

/// RSI thresholds: oversold below 30 reads LONG, overbought above 70 SHORT,
/// with confidence growing linearly as the reading digs deeper:
///
///   LONG  conf = 0.5 + (30 - rsi) / 30
///   SHORT conf = 0.5 + (rsi - 70) / 30
pub struct RsiAnalyzer {
    period: usize,
    min_candles: usize,
}

impl RsiAnalyzer {
    pub fn new(min_candles: usize) -> Self {
        Self {
            period: 14,
            min_candles,
        }
    }
}

impl CandleAnalyzer for RsiAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Rsi
    }

    fn analyze(&self, window: &[Candle], _key: &CandleKey) -> AnalyzerResult {
        if window.len() < self.min_candles {
            return AnalyzerResult::none("insufficient candles");
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let Some(rsi) = rsi_last(&closes, self.period) else {
            return AnalyzerResult::none("rsi unavailable");
        };

        if rsi < 30.0 {
            let confidence = 0.5 + (30.0 - rsi) / 30.0;
            AnalyzerResult::signal(
                Direction::Long,
                confidence,
                format!("rsi {:.1} oversold", rsi),
            )
        } else if rsi > 70.0 {
            let confidence = 0.5 + (rsi - 70.0) / 30.0;
            AnalyzerResult::signal(
                Direction::Short,
                confidence,
                format!("rsi {:.1} overbought", rsi),
            )
        } else {
            AnalyzerResult::none(format!("rsi {:.1} neutral", rsi))
        }
    }
}

/// MACD(12, 26, 9) histogram sign flip on the most recent close:
///
///   prev <= 0 and curr > 0  => LONG
///   prev >= 0 and curr < 0  => SHORT
///   conf = 0.5 + min(|hist| * 100, 0.4) + (0.2 if macd > 0 else 0.1)
pub struct MacdAnalyzer {
    fast: usize,
    slow: usize,
    signal: usize,
    min_candles: usize,
}

impl MacdAnalyzer {
    pub fn new(min_candles: usize) -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
            min_candles,
        }
    }
}

impl CandleAnalyzer for MacdAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Macd
    }

    fn analyze(&self, window: &[Candle], _key: &CandleKey) -> AnalyzerResult {
        if window.len() < self.min_candles {
            return AnalyzerResult::none("insufficient candles");
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let Some((prev, curr)) = macd_last_two(&closes, self.fast, self.slow, self.signal) else {
            return AnalyzerResult::none("macd unavailable");
        };

        let bullish_cross = prev.histogram <= 0.0 && curr.histogram > 0.0;
        let bearish_cross = prev.histogram >= 0.0 && curr.histogram < 0.0;
        if !bullish_cross && !bearish_cross {
            return AnalyzerResult::none(format!("histogram {:.5}, no crossover", curr.histogram));
        }

        let strength = (curr.histogram.abs() * 100.0).min(0.4);
        let trend_bonus = if curr.macd > 0.0 { 0.2 } else { 0.1 };
        let confidence = 0.5 + strength + trend_bonus;

        let direction = if bullish_cross {
            Direction::Long
        } else {
            Direction::Short
        };
        AnalyzerResult::signal(
            direction,
            confidence,
            format!(
                "histogram crossed {:.5} -> {:.5}, macd {:.5}",
                prev.histogram, curr.histogram, curr.macd
            ),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    fn candle(i: usize, close: f64) -> Candle {
        Candle {
            symbol: "SOLUSDT".into(),
            timeframe: "15m".into(),
            open_time: i as i64 * HOUR_MS,
            close_time: (i as i64 + 1) * HOUR_MS - 1,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 50.0,
            quote_volume: 0.0,
            trade_count: 10,
            taker_buy_base: 0.0,
            taker_buy_quote: 0.0,
        }
    }

    fn window_from(closes: &[f64]) -> Vec<Candle> {
        closes.iter().enumerate().map(|(i, &c)| candle(i, c)).collect()
    }

    fn key() -> CandleKey {
        CandleKey::new("SOLUSDT", "15m")
    }

    #[test]
    fn rsi_selloff_reads_long() {
        // Long flat stretch then a hard slide: RSI pins low.
        let mut closes = vec![100.0; 90];
        for i in 0..20 {
            closes.push(100.0 - (i + 1) as f64 * 1.5);
        }
        let result = RsiAnalyzer::new(100).analyze(&window_from(&closes), &key());
        assert_eq!(result.direction, Some(Direction::Long));
        assert!(result.confidence > 0.5);
        assert!(result.confidence <= 1.0);
    }

    #[test]
    fn rsi_melt_up_reads_short() {
        let mut closes = vec![100.0; 90];
        for i in 0..20 {
            closes.push(100.0 + (i + 1) as f64 * 1.5);
        }
        let result = RsiAnalyzer::new(100).analyze(&window_from(&closes), &key());
        assert_eq!(result.direction, Some(Direction::Short));
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn rsi_neutral_range_is_silent() {
        let closes: Vec<f64> = (0..110)
            .map(|i| 100.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let result = RsiAnalyzer::new(100).analyze(&window_from(&closes), &key());
        assert!(result.is_none());
        assert!(result.detail.contains("neutral"));
    }

    #[test]
    fn rsi_confidence_formula_at_depth() {
        // Drive RSI to ~0 with a pure downtrend: conf = 0.5 + 30/30 -> capped 1.0.
        let closes: Vec<f64> = (0..120).map(|i| 500.0 - i as f64).collect();
        let result = RsiAnalyzer::new(100).analyze(&window_from(&closes), &key());
        assert_eq!(result.direction, Some(Direction::Long));
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn short_window_is_silent() {
        let closes = vec![100.0; 50];
        assert!(RsiAnalyzer::new(100).analyze(&window_from(&closes), &key()).is_none());
        assert!(MacdAnalyzer::new(100).analyze(&window_from(&closes), &key()).is_none());
    }

    #[test]
    fn macd_turnaround_reads_long() {
        // Decline then sharp recovery: histogram flips positive near the end.
        let mut closes: Vec<f64> = (0..80).map(|i| 200.0 - i as f64 * 0.8).collect();
        for i in 0..22 {
            closes.push(136.0 + i as f64 * 1.8);
        }
        let window = window_from(&closes);

        // Find the exact flip candle, then analyze the prefix ending there.
        let all: Vec<f64> = window.iter().map(|c| c.close).collect();
        let mut flip_at = None;
        for end in 40..=all.len() {
            if let Some((prev, curr)) = macd_last_two(&all[..end], 12, 26, 9) {
                if prev.histogram <= 0.0 && curr.histogram > 0.0 {
                    flip_at = Some(end);
                    break;
                }
            }
        }
        let end = flip_at.expect("recovery must flip the histogram");
        let result = MacdAnalyzer::new(60).analyze(&window[..end], &key());
        assert_eq!(result.direction, Some(Direction::Long));
        assert!(result.confidence >= 0.5);
        assert!(result.confidence <= 1.0);
        assert!(result.detail.contains("crossed"));
    }

    #[test]
    fn macd_steady_trend_has_no_crossover() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64).collect();
        let result = MacdAnalyzer::new(100).analyze(&window_from(&closes), &key());
        assert!(result.is_none());
        assert!(result.detail.contains("no crossover"));
    }

    #[test]
    fn analyzer_purity() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 20.0)
            .collect();
        let window = window_from(&closes);
        for analyzer in [&RsiAnalyzer::new(100) as &dyn CandleAnalyzer, &MacdAnalyzer::new(100)] {
            let a = analyzer.analyze(&window, &key());
            let b = analyzer.analyze(&window, &key());
            assert_eq!(a.direction, b.direction);
            assert_eq!(a.confidence, b.confidence);
        }
    }
}
