// =============================================================================
// Exponential Moving Average
// =============================================================================
//
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The series is seeded with the simple average of the first `period` values,
// so output element 0 corresponds to input index `period - 1`.

/// Simple average of the last `period` values. `None` when there are fewer
/// than `period` values or the mean is non-finite.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mean = values[values.len() - period..].iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

/// Full EMA series for `values`. Empty when `period` is zero or the input is
/// shorter than `period`; truncated at the first non-finite step.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let seed = values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);

    let mut current = seed;
    for &value in &values[period..] {
        current = value * multiplier + current * (1.0 - multiplier);
        if !current.is_finite() {
            break;
        }
        series.push(current);
    }
    series
}
