//! Technical indicator math over daily series.
//!
//! Series are oldest first. Rolling indicators return `None` until their
//! window is filled.

/// Simple moving average over `window` values.
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Sample standard deviation (n - 1) over `window` values.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }
    rolling(values, window, |w| {
        let mean = w.iter().sum::<f64>() / w.len() as f64;
        let var = w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64;
        var.sqrt()
    })
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

fn rolling<F>(values: &[f64], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                Some(f(&values[i + 1 - window..=i]))
            }
        })
        .collect()
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with
/// the first value (no bias adjustment).
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    for (i, v) in values.iter().enumerate() {
        if i == 0 {
            out.push(*v);
        } else {
            let prev = out[i - 1];
            out.push(prev + alpha * (v - prev));
        }
    }
    out
}

/// Exponential smoothing with `alpha = 1 / (1 + com)` over a gappy series.
///
/// Starts at the first present value; gaps carry the previous value.
pub fn ewm_com(values: &[Option<f64>], com: f64) -> Vec<Option<f64>> {
    let alpha = 1.0 / (1.0 + com);
    let mut state: Option<f64> = None;
    values
        .iter()
        .map(|v| {
            state = match (state, v) {
                (None, Some(x)) => Some(*x),
                (Some(prev), Some(x)) => Some(prev + alpha * (x - prev)),
                (s, None) => s,
            };
            state
        })
        .collect()
}

/// `values[i] - values[i - n]`.
pub fn diff(values: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i < n {
                return None;
            }
            match (values[i], values[i - n]) {
                (Some(a), Some(b)) => Some(a - b),
                _ => None,
            }
        })
        .collect()
}

/// RSI from rolling means of gains and losses.
pub fn rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        let delta = if i == 0 { 0.0 } else { closes[i] - closes[i - 1] };
        gains.push(delta.max(0.0));
        losses.push((-delta).max(0.0));
    }

    sma(&gains, window)
        .into_iter()
        .zip(sma(&losses, window))
        .map(|(g, l)| match (g, l) {
            (Some(g), Some(l)) if l > 0.0 => Some(100.0 - 100.0 / (1.0 + g / l)),
            (Some(g), Some(_)) if g > 0.0 => Some(100.0),
            _ => None,
        })
        .collect()
}

/// MACD line, signal line and histogram.
#[derive(Debug, Clone)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);
    let hist = line.iter().zip(&signal_line).map(|(m, s)| m - s).collect();
    Macd {
        macd: line,
        signal: signal_line,
        hist,
    }
}

/// Stochastic K, D and J lines.
#[derive(Debug, Clone)]
pub struct Kdj {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
    pub j: Vec<Option<f64>>,
}

pub fn kdj(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Kdj {
    let low_min = rolling_min(lows, window);
    let high_max = rolling_max(highs, window);

    let rsv: Vec<Option<f64>> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| match (low_min[i], high_max[i]) {
            (Some(lo), Some(hi)) if hi > lo => Some((c - lo) / (hi - lo) * 100.0),
            _ => None,
        })
        .collect();

    let k = ewm_com(&rsv, 2.0);
    let d = ewm_com(&k, 2.0);
    let j = k
        .iter()
        .zip(&d)
        .map(|(k, d)| match (k, d) {
            (Some(k), Some(d)) => Some(3.0 * k - 2.0 * d),
            _ => None,
        })
        .collect();

    Kdj { k, d, j }
}

/// Bollinger bands: (upper, middle, lower).
pub fn bollinger(
    closes: &[f64],
    window: usize,
    width: f64,
) -> (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>) {
    let mid = sma(closes, window);
    let std = rolling_std(closes, window);
    let band = |sign: f64| -> Vec<Option<f64>> {
        mid.iter()
            .zip(&std)
            .map(|(m, s)| match (m, s) {
                (Some(m), Some(s)) => Some(m + sign * width * s),
                _ => None,
            })
            .collect()
    };
    let upper = band(1.0);
    let lower = band(-1.0);
    (upper, mid, lower)
}

/// Last element of a rolling series.
pub fn last(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Round to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sma() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[3], Some(3.0));
    }

    #[test]
    fn test_rolling_std_sample() {
        let out = rolling_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        // Sample std of the classic example is sqrt(32 / 7)
        assert!(approx(out[7].unwrap(), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let out = ema(&[10.0, 20.0], 3);
        assert_eq!(out[0], 10.0);
        assert!(approx(out[1], 15.0));
    }

    #[test]
    fn test_ewm_com_skips_leading_gaps() {
        let out = ewm_com(&[None, Some(30.0), Some(60.0), None], 2.0);
        assert_eq!(out[0], None);
        assert_eq!(out[1], Some(30.0));
        assert!(approx(out[2].unwrap(), 40.0));
        assert!(approx(out[3].unwrap(), 40.0));
    }

    #[test]
    fn test_diff() {
        let series = vec![Some(1.0), Some(2.0), None, Some(7.0)];
        let out = diff(&series, 2);
        assert_eq!(out, vec![None, None, None, Some(5.0)]);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(last(&rsi(&rising, 14)), Some(100.0));

        let flat = vec![5.0; 20];
        assert_eq!(last(&rsi(&flat, 14)), None);

        let falling: Vec<f64> = (1..=20).rev().map(f64::from).collect();
        assert!(approx(last(&rsi(&falling, 14)).unwrap(), 0.0));
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let out = macd(&[3.0; 40], 12, 26, 9);
        assert!(out.hist.iter().all(|h| approx(*h, 0.0)));
    }

    #[test]
    fn test_kdj_at_top_of_range() {
        let highs: Vec<f64> = (1..=12).map(f64::from).collect();
        let lows: Vec<f64> = highs.iter().map(|h| h - 1.0).collect();
        let closes = highs.clone();
        let out = kdj(&highs, &lows, &closes, 9);
        assert_eq!(out.k[7], None);
        // Close is always the window high, so RSV = 100 and K stays at 100
        assert!(approx(last(&out.k).unwrap(), 100.0));
        assert!(approx(last(&out.j).unwrap(), 100.0));
    }

    #[test]
    fn test_bollinger_symmetric() {
        let closes: Vec<f64> = (1..=20).map(f64::from).collect();
        let (upper, mid, lower) = bollinger(&closes, 20, 2.0);
        let m = last(&mid).unwrap();
        assert!(approx(m, 10.5));
        assert!(approx(last(&upper).unwrap() - m, m - last(&lower).unwrap()));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1234.6, 0), 1235.0);
    }
}
