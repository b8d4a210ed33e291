//! Indicator math over candle series.
//!
//! Pure functions, `f64` in and out. Anything asked to look further back
//! than the series reaches returns `None` rather than dividing by nothing.

use spot_bot_core::types::Candle;

/// Simple moving average of the last `period` values.
#[must_use]
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Population standard deviation of the last `period` values.
#[must_use]
pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Some(variance.sqrt())
}

/// Z-score of the last value against the last `period` values.
/// A degenerate (zero-variance) window scores 0.
#[must_use]
pub fn zscore(values: &[f64], period: usize) -> Option<f64> {
    let last = *values.last()?;
    let mean = sma(values, period)?;
    let sd = stddev(values, period)?;
    if sd == 0.0 {
        return Some(0.0);
    }
    Some((last - mean) / sd)
}

/// Exponential moving average, seeded with the first value, one output per
/// input.
#[must_use]
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for value in &values[1..] {
        ema = value * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

fn wilder_rsi(deltas: &[f64], period: usize) -> Option<f64> {
    if period == 0 || deltas.len() < period {
        return None;
    }
    let mut avg_gain = deltas[..period].iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = deltas[..period].iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;
    for delta in &deltas[period..] {
        avg_gain = (avg_gain * (period - 1) as f64 + delta.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + (-delta).max(0.0)) / period as f64;
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Wilder-smoothed RSI: `(current, previous)`, so the caller can derive the
/// one-bar slope.
#[must_use]
pub fn rsi(closes: &[f64], period: usize) -> Option<(f64, f64)> {
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    if deltas.len() < period + 1 {
        return None;
    }
    let current = wilder_rsi(&deltas, period)?;
    let previous = wilder_rsi(&deltas[..deltas.len() - 1], period)?;
    Some((current, previous))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_histogram: f64,
}

/// MACD with an EMA-of-EMA signal line. Exposes the current and previous
/// histogram so slope can be derived.
#[must_use]
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdPoint> {
    if closes.len() < slow + signal_period {
        return None;
    }
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema_series(&line, signal_period);
    let n = line.len();
    Some(MacdPoint {
        macd: line[n - 1],
        signal: signal[n - 1],
        histogram: line[n - 1] - signal[n - 1],
        prev_histogram: line[n - 2] - signal[n - 2],
    })
}

/// Per-bar true range: `max(high − low, |high − prevClose|, |low − prevClose|)`.
#[must_use]
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.high - c.low
            } else {
                let prev_close = candles[i - 1].close;
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            }
        })
        .collect()
}

/// Wilder-smoothed ATR series. The first output is the simple mean of the
/// first `period` true ranges.
#[must_use]
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let trs = true_ranges(candles);
    if period == 0 || trs.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(trs.len() - period + 1);
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    out.push(atr);
    for tr in &trs[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        out.push(atr);
    }
    out
}

/// Current ATR.
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// Rank of `value` inside `values` as a percentage of entries ≤ it.
#[must_use]
pub fn percentile_rank(values: &[f64], value: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let below = values.iter().filter(|v| **v <= value).count();
    Some(below as f64 / values.len() as f64 * 100.0)
}

#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Volume-weighted average of typical price over the last `period` candles.
#[must_use]
pub fn vwap(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let volume: f64 = window.iter().map(|c| c.volume).sum();
    if volume <= 0.0 {
        return None;
    }
    let weighted: f64 = window.iter().map(|c| c.typical_price() * c.volume).sum();
    Some(weighted / volume)
}

/// Z-score of the last close against the typical-price window.
#[must_use]
pub fn vwap_zscore(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let close = candles.last()?.close;
    let typicals: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(Candle::typical_price)
        .collect();
    let mean = typicals.iter().sum::<f64>() / period as f64;
    let variance = typicals.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    if sd == 0.0 {
        return Some(0.0);
    }
    Some((close - mean) / sd)
}

/// Sign of the on-balance-volume change over the last `lag` bars.
#[must_use]
pub fn obv_direction(candles: &[Candle], lag: usize) -> i8 {
    if candles.len() < lag + 1 {
        return 0;
    }
    let mut obv = Vec::with_capacity(candles.len());
    let mut acc = 0.0;
    obv.push(acc);
    for window in candles.windows(2) {
        if window[1].close > window[0].close {
            acc += window[1].volume;
        } else if window[1].close < window[0].close {
            acc -= window[1].volume;
        }
        obv.push(acc);
    }
    let delta = obv[obv.len() - 1] - obv[obv.len() - 1 - lag];
    if delta > 0.0 {
        1
    } else if delta < 0.0 {
        -1
    } else {
        0
    }
}
