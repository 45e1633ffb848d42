// =============================================================================
// Wyckoff analyzer — phase classification plus spring / upthrust detection
// =============================================================================
//
// The detector looks at a trailing range built from the candles *before* the
// most recent close, so the latest candle is free to pierce the range edge:
//
//   spring   — low breaks below the range floor but the close recovers above
//              it, during Accumulation, on a volume spike  => LONG
//   upthrust — high breaks above the range ceiling but the close falls back
//              under it, during Distribution, on a volume spike => SHORT
//
// Confidence grows with how deep the pierce cut relative to the range width
// and how hard volume expanded over its 20-candle average.

use crate::analyzers::CandleAnalyzer;
use crate::indicators::sma;
use crate::market_data::{Candle, CandleKey};
use crate::types::{AnalyzerKind, AnalyzerResult, Direction};

/// Candles in the trailing range, not counting the candle under test.
const RANGE_LOOKBACK: usize = 50;
/// Volume average the spike test compares against.
const VOLUME_SMA_PERIOD: usize = 20;
/// Spike threshold: candle volume must exceed this multiple of the average.
const VOLUME_SPIKE_MULT: f64 = 1.5;
/// Range width as a fraction of its midpoint below which price is "sideways".
const SIDEWAYS_MAX_WIDTH: f64 = 0.12;
/// Volume-slope ratios separating rising from waning participation.
const VOLUME_RISING_RATIO: f64 = 1.1;
const VOLUME_WANING_RATIO: f64 = 0.9;
/// Minimum prior-trend gain for a range to count as post-rally.
const RALLY_MIN_CHANGE: f64 = 0.03;
/// Verdicts scoring under this are dropped as noise.
const MIN_CONFIDENCE: f64 = 0.35;

/// Market phase over the trailing range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accumulation,
    Distribution,
    Markup,
    Markdown,
}

pub struct WyckoffAnalyzer {
    min_candles: usize,
}

impl WyckoffAnalyzer {
    pub fn new(min_candles: usize) -> Self {
        Self { min_candles }
    }

    /// Classify the phase of the range slice (the candles preceding the one
    /// under test). `pre_range_close` anchors the trend that led into the
    /// range, when enough history exists.
    fn classify(range: &[Candle], pre_range_close: Option<f64>) -> Phase {
        let range_high = range.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let range_low = range.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let mid = (range_high + range_low) / 2.0;
        let last_close = range.last().map(|c| c.close).unwrap_or(mid);

        let sideways = mid > 0.0 && (range_high - range_low) / mid <= SIDEWAYS_MAX_WIDTH;

        let volumes: Vec<f64> = range.iter().map(|c| c.volume).collect();
        let recent = sma(&volumes, 10);
        let prior = sma(&volumes[..volumes.len().saturating_sub(10)], 10);
        let (rising, waning) = match (recent, prior) {
            (Some(r), Some(p)) if p > 0.0 => {
                (r > p * VOLUME_RISING_RATIO, r < p * VOLUME_WANING_RATIO)
            }
            _ => (false, false),
        };

        let after_rally = match (pre_range_close, range.first()) {
            (Some(pre), Some(first)) if pre > 0.0 => {
                (first.close - pre) / pre > RALLY_MIN_CHANGE
            }
            _ => false,
        };

        if sideways && rising {
            Phase::Accumulation
        } else if sideways && waning && after_rally {
            Phase::Distribution
        } else if last_close >= mid {
            Phase::Markup
        } else {
            Phase::Markdown
        }
    }

    fn confidence(penetration_ratio: f64, volume_mult: f64) -> f64 {
        let depth_score = (penetration_ratio * 4.0).min(0.45);
        let volume_score = ((volume_mult - 1.0) * 0.15).min(0.30);
        (0.25 + depth_score + volume_score).min(1.0)
    }
}

impl CandleAnalyzer for WyckoffAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Wyckoff
    }

    fn analyze(&self, window: &[Candle], _key: &CandleKey) -> AnalyzerResult {
        if window.len() < self.min_candles || window.len() < RANGE_LOOKBACK + 1 {
            return AnalyzerResult::none("insufficient candles");
        }

        let last = &window[window.len() - 1];
        let range_start = window.len() - 1 - RANGE_LOOKBACK;
        let range = &window[range_start..window.len() - 1];

        let range_high = range.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let range_low = range.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let width = range_high - range_low;
        if width <= 0.0 || !width.is_finite() {
            return AnalyzerResult::none("degenerate range");
        }

        let pre_range_close = range_start
            .checked_sub(RANGE_LOOKBACK)
            .map(|i| window[i].close);
        let phase = Self::classify(range, pre_range_close);

        // Volume spike relative to the 20 candles before the one under test.
        let volumes: Vec<f64> = range.iter().map(|c| c.volume).collect();
        let volume_avg = match sma(&volumes, VOLUME_SMA_PERIOD) {
            Some(v) if v > 0.0 => v,
            _ => return AnalyzerResult::none("no volume baseline"),
        };
        let volume_mult = last.volume / volume_avg;
        let spiked = volume_mult > VOLUME_SPIKE_MULT;

        let spring = last.low < range_low && last.close >= range_low;
        let upthrust = last.high > range_high && last.close <= range_high;

        if spring && phase == Phase::Accumulation && spiked {
            let penetration = (range_low - last.low) / width;
            let confidence = Self::confidence(penetration, volume_mult);
            if confidence >= MIN_CONFIDENCE {
                return AnalyzerResult::signal(
                    Direction::Long,
                    confidence.clamp(MIN_CONFIDENCE, 1.0),
                    format!(
                        "spring below {:.4} (depth {:.1}% of range), volume x{:.2}",
                        range_low,
                        penetration * 100.0,
                        volume_mult
                    ),
                );
            }
        }

        if upthrust && phase == Phase::Distribution && spiked {
            let penetration = (last.high - range_high) / width;
            let confidence = Self::confidence(penetration, volume_mult);
            if confidence >= MIN_CONFIDENCE {
                return AnalyzerResult::signal(
                    Direction::Short,
                    confidence.clamp(MIN_CONFIDENCE, 1.0),
                    format!(
                        "upthrust above {:.4} (depth {:.1}% of range), volume x{:.2}",
                        range_high,
                        penetration * 100.0,
                        volume_mult
                    ),
                );
            }
        }

        AnalyzerResult::none(format!("phase {:?}, no event", phase))
    }
}
