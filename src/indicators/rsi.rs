// =============================================================================
// Relative Strength Index — Wilder smoothing
// =============================================================================
//
// Average gain and loss are seeded with the simple mean of the first `period`
// deltas, then smoothed:
//
//   avg = (prev_avg * (period - 1) + current) / period
//   RSI = 100 - 100 / (1 + avg_gain / avg_loss)
//
// A flat market reads 50, an all-gains market 100, an all-losses market 0.

/// RSI series for `closes`. One value per close from index `period` onward;
/// empty when the input is shorter than `period + 1` closes.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period].iter().filter(|&&d| d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        deltas[..period].iter().filter(|&&d| d < 0.0).map(|d| -d).sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(deltas.len() - period + 1);
    match point(avg_gain, avg_loss) {
        Some(v) => series.push(v),
        None => return Vec::new(),
    }

    let period_f = period as f64;
    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match point(avg_gain, avg_loss) {
            Some(v) => series.push(v),
            None => break,
        }
    }
    series
}

/// Most recent RSI value, if computable.
pub fn rsi_last(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

/// One RSI point from the smoothed averages, `None` if non-finite.
fn point(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    rsi.is_finite().then_some(rsi)
}
