/// Round to a fixed number of decimals for display columns
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Simple Moving Average over the trailing `period` values.
///
/// Output has one slot per input value; the first `period - 1` slots are `None`.
pub fn sma(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; data.len()];
    }

    let mut result = Vec::with_capacity(data.len());
    for i in 0..data.len() {
        if i + 1 < period {
            result.push(None);
            continue;
        }
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(Some(sum / period as f64));
    }
    result
}

/// SMA whose window ends one row earlier ("yesterday's average" next to today's price).
///
/// The first `period` slots are `None`.
pub fn sma_shifted(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if data.is_empty() {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len());
    result.push(None);
    result.extend(sma(&data[..data.len() - 1], period));
    result
}

/// Exponential Moving Average seeded with the first value.
///
/// EMA[0] = data[0], EMA[t] = α·data[t] + (1 − α)·EMA[t−1] with α = 2 / (period + 1).
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len());
    result.push(data[0]);

    for i in 1..data.len() {
        let ema_val = alpha * data[i] + (1.0 - alpha) * result[i - 1];
        result.push(ema_val);
    }

    result
}

/// Adjusted exponential mean with center of mass `com`, producing a value once
/// `min_periods` observations have been seen.
///
/// Weights are (1 − α)^i for the i-th most recent observation, normalized by
/// their sum, with α = 1 / (1 + com).
fn ewm_mean_com(data: &[f64], com: f64, min_periods: usize) -> Vec<Option<f64>> {
    let decay = 1.0 - 1.0 / (1.0 + com);
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    data.iter()
        .enumerate()
        .map(|(i, &x)| {
            numerator = x + decay * numerator;
            denominator = 1.0 + decay * denominator;
            if i + 1 >= min_periods {
                Some(numerator / denominator)
            } else {
                None
            }
        })
        .collect()
}

/// Relative Strength Index.
///
/// Output has one slot per close. Day-over-day changes start at row 1, so the
/// first value appears at row `period` once `period` changes are available.
/// A series with gains but no losses reads 100; a flat stretch with neither
/// gains nor losses is undefined (`None`). Values are rounded to 2 decimals.
pub fn rsi(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if data.is_empty() {
        return vec![];
    }
    if period == 0 {
        return vec![None; data.len()];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let com = (period - 1) as f64;
    let avg_gains = ewm_mean_com(&gains, com, period);
    let avg_losses = ewm_mean_com(&losses, com, period);

    let mut rsi_values = Vec::with_capacity(data.len());
    rsi_values.push(None);

    for (avg_gain, avg_loss) in avg_gains.into_iter().zip(avg_losses) {
        let value = match (avg_gain, avg_loss) {
            (Some(gain), Some(loss)) => rsi_from_averages(gain, loss),
            _ => None,
        };
        rsi_values.push(value.map(|v| round_to(v, 2)));
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        return if avg_gain > 0.0 { Some(100.0) } else { None };
    }

    let rs = (avg_gain / avg_loss).abs();
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD histogram.
///
/// The fast and slow EMAs are rounded to 2 decimals before the MACD line is
/// taken, the signal EMA of that line is rounded to 2 decimals as well, and the
/// histogram (line minus signal) is rounded to 3.
pub fn macd_histogram(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> Vec<f64> {
    if data.is_empty() || fast_period == 0 || slow_period == 0 || signal_period == 0 {
        return vec![];
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(fast, slow)| round_to(*fast, 2) - round_to(*slow, 2))
        .collect();

    let signal_line = ema(&macd_line, signal_period);

    macd_line
        .iter()
        .zip(&signal_line)
        .map(|(macd, signal)| round_to(macd - round_to(*signal, 2), 3))
        .collect()
}
