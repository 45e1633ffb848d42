// =============================================================================
// Average True Range — Wilder smoothing
// =============================================================================
//
//   TR  = max(H - L, |H - prev_close|, |L - prev_close|)
//   ATR = Wilder-smoothed TR, seeded with the SMA of the first `period` TRs
//
// Used by the fuser to size stop-loss and take-profit distances.

use crate::market_data::Candle;

/// Most recent ATR over `candles` (oldest first). `None` when fewer than
/// `period + 1` candles are available or a value goes non-finite.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| pair[1].true_range(pair[0].close))
        .collect();

    let seed = true_ranges[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let period_f = period as f64;
    let mut value = seed;
    for &tr in &true_ranges[period..] {
        value = (value * (period_f - 1.0) + tr) / period_f;
        if !value.is_finite() {
            return None;
        }
    }
    Some(value)
}
