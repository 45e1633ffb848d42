// =============================================================================
// Elliott analyzer — pivot extraction plus impulse / correction validation
// =============================================================================
//
// Pivots are local extrema over a +/-5 candle neighborhood. The detector
// needs at least five alternating pivots; the last five form the skeleton of
// a potential five-wave impulse:
//
//   up-impulse:  P1 low, P2 high, P3 low, P4 high, P5 low, with the fifth
//                wave running from P5 to the window's latest high
//
//   rules: wave 2 keeps above the wave-1 origin (P3 >= P1), wave 4 stays out
//   of wave-1 territory (P5 > P2), wave 3 is not the shortest of {1, 3, 5},
//   and wave 5 has pushed past P4.
//
// A completed impulse is traded against (mean reversion): up-impulse emits
// SHORT, down-impulse emits LONG. Failing that, the last pivots are checked
// for an A-B-C correction, which emits in the prior trend's direction.
// Confidence weighs how closely wave ratios sit to the Fibonacci targets and
// how evenly the pivots are spaced.

use crate::analyzers::CandleAnalyzer;
use crate::market_data::{Candle, CandleKey};
use crate::types::{AnalyzerKind, AnalyzerResult, Direction};

/// Candles on each side that a pivot must dominate.
const PIVOT_HALF_WIDTH: usize = 5;
/// Minimum alternating pivots before any structure is considered.
const MIN_PIVOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    High,
    Low,
}

/// A confirmed local extremum.
#[derive(Debug, Clone, Copy)]
pub struct Pivot {
    pub index: usize,
    pub price: f64,
    pub kind: PivotKind,
}

pub struct ElliottAnalyzer {
    min_candles: usize,
}

impl ElliottAnalyzer {
    pub fn new(min_candles: usize) -> Self {
        Self { min_candles }
    }
}

/// Scan the window for pivot highs/lows and collapse them into a strictly
/// alternating sequence, keeping the more extreme of same-kind neighbors.
pub fn alternating_pivots(window: &[Candle], half_width: usize) -> Vec<Pivot> {
    let n = window.len();
    if n < 2 * half_width + 1 {
        return Vec::new();
    }

    let mut raw: Vec<Pivot> = Vec::new();
    for i in half_width..n - half_width {
        let hood = &window[i - half_width..=i + half_width];
        let high = window[i].high;
        let low = window[i].low;

        if hood.iter().all(|c| c.high <= high) {
            raw.push(Pivot {
                index: i,
                price: high,
                kind: PivotKind::High,
            });
        } else if hood.iter().all(|c| c.low >= low) {
            raw.push(Pivot {
                index: i,
                price: low,
                kind: PivotKind::Low,
            });
        }
    }

    let mut alternating: Vec<Pivot> = Vec::new();
    for pivot in raw {
        match alternating.last_mut() {
            Some(prev) if prev.kind == pivot.kind => {
                // Same kind in a row: keep the dominant one.
                let replace = match pivot.kind {
                    PivotKind::High => pivot.price > prev.price,
                    PivotKind::Low => pivot.price < prev.price,
                };
                if replace {
                    *prev = pivot;
                }
            }
            _ => alternating.push(pivot),
        }
    }
    alternating
}

/// Closeness of `ratio` to `target`, 1.0 at a perfect hit, 0.0 past 100 %
/// deviation.
fn fib_fit(ratio: f64, target: f64) -> f64 {
    if !ratio.is_finite() || target <= 0.0 {
        return 0.0;
    }
    (1.0 - ((ratio - target).abs() / target).min(1.0)).max(0.0)
}

/// Evenness of pivot spacing: 1.0 for perfectly regular gaps, falling toward
/// 0.0 as spacing becomes erratic.
fn spacing_symmetry(pivots: &[Pivot]) -> f64 {
    if pivots.len() < 3 {
        return 0.0;
    }
    let gaps: Vec<f64> = pivots
        .windows(2)
        .map(|p| (p[1].index - p[0].index) as f64)
        .collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    (1.0 - (variance.sqrt() / mean).min(1.0)).max(0.0)
}

struct Impulse {
    direction: Direction,
    confidence: f64,
    detail: String,
}

/// Validate the last five alternating pivots as a completed five-wave
/// impulse. `direction` is the *emitted* (mean-reversion) direction.
fn validate_impulse(pivots: &[Pivot], window: &[Candle]) -> Option<Impulse> {
    let p: &[Pivot] = &pivots[pivots.len() - 5..];

    let up_skeleton = p[0].kind == PivotKind::Low
        && p[1].kind == PivotKind::High
        && p[2].kind == PivotKind::Low
        && p[3].kind == PivotKind::High
        && p[4].kind == PivotKind::Low;
    let down_skeleton = p[0].kind == PivotKind::High
        && p[1].kind == PivotKind::Low
        && p[2].kind == PivotKind::High
        && p[3].kind == PivotKind::Low
        && p[4].kind == PivotKind::High;

    let tail_start = p[4].index + 1;
    if tail_start >= window.len() {
        return None;
    }

    if up_skeleton {
        let wave1 = p[1].price - p[0].price;
        let wave2 = p[1].price - p[2].price;
        let wave3 = p[3].price - p[2].price;
        let wave4 = p[3].price - p[4].price;
        let latest_high = window[tail_start..]
            .iter()
            .map(|c| c.high)
            .fold(f64::MIN, f64::max);
        let wave5 = latest_high - p[4].price;

        let structure_ok = wave1 > 0.0
            && wave2 > 0.0
            && wave3 > 0.0
            && wave4 > 0.0
            && wave5 > 0.0
            && p[2].price >= p[0].price        // wave 2 retrace <= 100 %
            && p[4].price > p[1].price         // wave 4 clear of wave-1 range
            && latest_high > p[3].price        // wave 5 extended past P4
            && !(wave3 < wave1 && wave3 < wave5); // wave 3 never the shortest

        if structure_ok {
            let retrace_fit = fib_fit(wave2 / wave1, 0.618);
            let extension_fit = fib_fit(wave3 / wave1, 1.618);
            let confidence = (0.25
                + 0.30 * retrace_fit
                + 0.25 * extension_fit
                + 0.20 * spacing_symmetry(p))
            .clamp(0.0, 1.0);
            return Some(Impulse {
                direction: Direction::Short,
                confidence,
                detail: format!(
                    "up-impulse complete at {:.4}; w2/w1 {:.2}, w3/w1 {:.2}",
                    latest_high,
                    wave2 / wave1,
                    wave3 / wave1
                ),
            });
        }
    }

    if down_skeleton {
        let wave1 = p[0].price - p[1].price;
        let wave2 = p[2].price - p[1].price;
        let wave3 = p[2].price - p[3].price;
        let wave4 = p[4].price - p[3].price;
        let latest_low = window[tail_start..]
            .iter()
            .map(|c| c.low)
            .fold(f64::MAX, f64::min);
        let wave5 = p[4].price - latest_low;

        let structure_ok = wave1 > 0.0
            && wave2 > 0.0
            && wave3 > 0.0
            && wave4 > 0.0
            && wave5 > 0.0
            && p[2].price <= p[0].price
            && p[4].price < p[1].price
            && latest_low < p[3].price
            && !(wave3 < wave1 && wave3 < wave5);

        if structure_ok {
            let retrace_fit = fib_fit(wave2 / wave1, 0.618);
            let extension_fit = fib_fit(wave3 / wave1, 1.618);
            let confidence = (0.25
                + 0.30 * retrace_fit
                + 0.25 * extension_fit
                + 0.20 * spacing_symmetry(p))
            .clamp(0.0, 1.0);
            return Some(Impulse {
                direction: Direction::Long,
                confidence,
                detail: format!(
                    "down-impulse complete at {:.4}; w2/w1 {:.2}, w3/w1 {:.2}",
                    latest_low,
                    wave2 / wave1,
                    wave3 / wave1
                ),
            });
        }
    }

    None
}

/// Validate the last four alternating pivots as trend leg + A-B-C correction.
/// Emits the prior trend's direction (continuation).
fn validate_correction(pivots: &[Pivot]) -> Option<Impulse> {
    if pivots.len() < 4 {
        return None;
    }
    let p: &[Pivot] = &pivots[pivots.len() - 4..];
    let (origin, a, b, c) = (p[0], p[1], p[2], p[3]);

    let trend_leg = (a.price - origin.price).abs();
    let leg_ab = (b.price - a.price).abs();
    let leg_bc = (c.price - b.price).abs();
    if trend_leg <= 0.0 || leg_ab <= 0.0 {
        return None;
    }

    let retrace = leg_ab / trend_leg;
    let extension = leg_bc / leg_ab;
    if !(0.5..=1.0).contains(&retrace) || !(1.0..=1.618).contains(&extension) {
        return None;
    }

    let direction = if a.price > origin.price {
        Direction::Long
    } else {
        Direction::Short
    };

    // Best fit against the nearby Fibonacci anchors.
    let retrace_fit = fib_fit(retrace, 0.618);
    let extension_fit = fib_fit(extension, 1.0).max(fib_fit(extension, 1.618));
    let confidence =
        (0.20 + 0.35 * retrace_fit + 0.25 * extension_fit + 0.20 * spacing_symmetry(p))
            .clamp(0.0, 1.0);

    Some(Impulse {
        direction,
        confidence,
        detail: format!(
            "abc correction; retrace {:.2} of trend leg, c/a {:.2}",
            retrace, extension
        ),
    })
}

impl CandleAnalyzer for ElliottAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Elliott
    }

    fn analyze(&self, window: &[Candle], _key: &CandleKey) -> AnalyzerResult {
        if window.len() < self.min_candles {
            return AnalyzerResult::none("insufficient candles");
        }

        let pivots = alternating_pivots(window, PIVOT_HALF_WIDTH);
        if pivots.len() < MIN_PIVOTS {
            return AnalyzerResult::none(format!("{} pivots, need {}", pivots.len(), MIN_PIVOTS));
        }

        if let Some(impulse) = validate_impulse(&pivots, window) {
            return AnalyzerResult::signal(impulse.direction, impulse.confidence, impulse.detail);
        }
        if let Some(correction) = validate_correction(&pivots) {
            return AnalyzerResult::signal(
                correction.direction,
                correction.confidence,
                correction.detail,
            );
        }

        AnalyzerResult::none("no valid wave structure")
    }
}
