// =============================================================================
// Moving Average Convergence Divergence
// =============================================================================
//
//   MACD line  = EMA(fast) - EMA(slow)        (fast 12, slow 26)
//   signal     = EMA(signal_period) of MACD   (9)
//   histogram  = MACD - signal
//
// The histogram's sign flips are what the crossover analyzer watches, so the
// series keeps all three components aligned per close.

use crate::indicators::ema::ema_series;

/// One aligned MACD observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Full MACD series. The first point corresponds to close index
/// `slow + signal_period - 2`; empty when the input cannot seed all three
/// EMAs (fewer than `slow + signal_period - 1` closes).
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Vec<MacdPoint> {
    if fast == 0 || slow <= fast || signal_period == 0 {
        return Vec::new();
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return Vec::new();
    }

    // Align the two EMAs on close index: fast starts `slow - fast` steps
    // earlier than slow.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| fast_series.get(i + offset).map(|&f| f - s))
        .collect();

    let signal_series = ema_series(&macd_line, signal_period);
    if signal_series.is_empty() {
        return Vec::new();
    }

    // The signal EMA consumes `signal_period - 1` leading MACD values.
    let lead = signal_period - 1;
    signal_series
        .iter()
        .enumerate()
        .filter_map(|(i, &sig)| {
            macd_line.get(i + lead).map(|&m| MacdPoint {
                macd: m,
                signal: sig,
                histogram: m - sig,
            })
        })
        .collect()
}

/// The two most recent MACD points, `(previous, current)` — the pair a
/// crossover check needs. `None` when fewer than two points exist.
pub fn macd_last_two(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<(MacdPoint, MacdPoint)> {
    let series = macd_series(closes, fast, slow, signal_period);
    if series.len() < 2 {
        return None;
    }
    Some((series[series.len() - 2], series[series.len() - 1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_short_input_is_empty() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        // Needs 26 + 9 - 1 = 34 closes for the first point.
        assert!(macd_series(&closes, 12, 26, 9).is_empty());
        assert!(macd_last_two(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn degenerate_periods_are_rejected() {
        let closes: Vec<f64> = (1..=60).map(f64::from).collect();
        assert!(macd_series(&closes, 0, 26, 9).is_empty());
        assert!(macd_series(&closes, 26, 12, 9).is_empty());
        assert!(macd_series(&closes, 12, 26, 0).is_empty());
    }

    #[test]
    fn flat_series_is_all_zero() {
        let series = macd_series(&[100.0; 60], 12, 26, 9);
        assert!(!series.is_empty());
        for p in series {
            assert!(p.macd.abs() < 1e-9);
            assert!(p.signal.abs() < 1e-9);
            assert!(p.histogram.abs() < 1e-9);
        }
    }

    #[test]
    fn uptrend_has_positive_macd() {
        let closes: Vec<f64> = (1..=80).map(|i| 100.0 + i as f64).collect();
        let series = macd_series(&closes, 12, 26, 9);
        let last = series.last().unwrap();
        // Fast EMA sits above slow EMA in a steady climb.
        assert!(last.macd > 0.0);
    }

    #[test]
    fn histogram_is_macd_minus_signal() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.4).sin() * 5.0)
            .collect();
        for p in macd_series(&closes, 12, 26, 9) {
            assert!((p.histogram - (p.macd - p.signal)).abs() < 1e-12);
        }
    }

    #[test]
    fn reversal_flips_histogram_sign() {
        // Long decline, then a sharp rally: the histogram must cross from
        // negative to positive somewhere in the rally.
        let mut closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        closes.extend((0..40).map(|i| 140.0 + 3.0 * i as f64));
        let series = macd_series(&closes, 12, 26, 9);
        let signs: Vec<bool> = series.iter().map(|p| p.histogram > 0.0).collect();
        assert!(signs.iter().any(|&s| !s), "expected a negative stretch");
        assert!(*signs.last().unwrap(), "expected a positive finish");
    }

    #[test]
    fn last_two_are_the_series_tail() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.3).cos() * 8.0)
            .collect();
        let series = macd_series(&closes, 12, 26, 9);
        let (prev, curr) = macd_last_two(&closes, 12, 26, 9).unwrap();
        assert_eq!(prev, series[series.len() - 2]);
        assert_eq!(curr, series[series.len() - 1]);
    }
}
