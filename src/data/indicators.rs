//! Derived technical-indicator columns for OHLCV data.
//!
//! Every indicator is computed from the `close` and `vol` columns. Cells that
//! fall inside an indicator's warm-up window are `Missing`, so the
//! preprocessor drops those rows if the indicator is selected as a feature.

use crate::data::dataset::{Dataset, Value};
use crate::error::{Error, Result};

/// Column names added by [`add_technical_indicators`], in insertion order.
pub const INDICATOR_COLUMNS: [&str; 14] = [
    "ma_5",
    "ma_10",
    "ma_20",
    "rsi",
    "price_change",
    "price_change_5",
    "volatility_10",
    "bb_middle",
    "bb_upper",
    "bb_lower",
    "macd",
    "macd_signal",
    "volume_ma",
    "volume_ratio",
];

type Series = Vec<Option<f64>>;

/// Appends moving averages, RSI, returns, volatility, Bollinger bands, MACD
/// and volume ratios to `dataset`.
pub fn add_technical_indicators(dataset: &mut Dataset) -> Result<()> {
    let close = dataset
        .numeric_column("close")
        .ok_or_else(|| Error::Data("technical indicators need a 'close' column".into()))?;
    let vol = dataset
        .numeric_column("vol")
        .ok_or_else(|| Error::Data("technical indicators need a 'vol' column".into()))?;

    let ma_20 = rolling_mean(&close, 20);
    let std_20 = rolling_std(&close, 20);
    let bb_upper = zip_with(&ma_20, &std_20, |m, s| Some(m + 2.0 * s));
    let bb_lower = zip_with(&ma_20, &std_20, |m, s| Some(m - 2.0 * s));
    let macd = zip_with(&ewm(&close, 12), &ewm(&close, 26), |a, b| Some(a - b));
    let macd_signal = ewm(&macd, 9);
    let volume_ma = rolling_mean(&vol, 10);
    let volume_ratio = zip_with(&vol, &volume_ma, |v, m| (m != 0.0).then(|| v / m));

    let columns: [(&str, Series); 14] = [
        ("ma_5", rolling_mean(&close, 5)),
        ("ma_10", rolling_mean(&close, 10)),
        ("ma_20", ma_20.clone()),
        ("rsi", rsi(&close, 14)),
        ("price_change", pct_change(&close, 1)),
        ("price_change_5", pct_change(&close, 5)),
        ("volatility_10", rolling_std(&close, 10)),
        ("bb_middle", ma_20),
        ("bb_upper", bb_upper),
        ("bb_lower", bb_lower),
        ("macd", macd),
        ("macd_signal", macd_signal),
        ("volume_ma", volume_ma),
        ("volume_ratio", volume_ratio),
    ];

    for (name, series) in columns {
        dataset.set_column(name, to_values(series));
    }
    Ok(())
}

fn to_values(series: Series) -> Vec<Value> {
    series
        .into_iter()
        .map(|v| match v {
            Some(x) if x.is_finite() => Value::Number(x),
            _ => Value::Missing,
        })
        .collect()
}

fn zip_with<F>(a: &[Option<f64>], b: &[Option<f64>], f: F) -> Series
where
    F: Fn(f64, f64) -> Option<f64>,
{
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => f(*x, *y),
            _ => None,
        })
        .collect()
}

/// Trailing mean over `window` values; `None` until the window is full.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Series {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Trailing sample standard deviation (n − 1 denominator).
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Series {
    rolling(values, window, |w| {
        let n = w.len() as f64;
        let mean = w.iter().sum::<f64>() / n;
        (w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    })
}

fn rolling<F>(values: &[Option<f64>], window: usize, f: F) -> Series
where
    F: Fn(&[f64]) -> f64,
{
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let w: Option<Vec<f64>> = values[i + 1 - window..=i].iter().copied().collect();
            w.map(|w| f(&w))
        })
        .collect()
}

/// Exponentially weighted mean with `alpha = 2 / (span + 1)`, seeded with the
/// first available value (no adjustment for early terms).
pub fn ewm(values: &[Option<f64>], span: usize) -> Series {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut state: Option<f64> = None;
    values
        .iter()
        .map(|v| {
            if let Some(x) = v {
                state = Some(match state {
                    Some(prev) => (1.0 - alpha) * prev + alpha * x,
                    None => *x,
                });
                state
            } else {
                None
            }
        })
        .collect()
}

/// Fractional change over `periods` rows.
pub fn pct_change(values: &[Option<f64>], periods: usize) -> Series {
    (0..values.len())
        .map(|i| {
            let prev = values.get(i.checked_sub(periods)?)?.as_ref()?;
            let cur = values[i]?;
            (*prev != 0.0).then(|| cur / prev - 1.0)
        })
        .collect()
}

/// Relative Strength Index from exponentially averaged gains and losses.
pub fn rsi(values: &[Option<f64>], period: usize) -> Series {
    let delta: Series = (0..values.len())
        .map(|i| if i == 0 { Some(0.0) } else { Some(values[i]? - values[i - 1]?) })
        .collect();
    let gains: Series = delta.iter().map(|d| d.map(|d| d.max(0.0))).collect();
    let losses: Series = delta.iter().map(|d| d.map(|d| (-d).max(0.0))).collect();
    zip_with(&ewm(&gains, period), &ewm(&losses, period), |g, l| {
        if l == 0.0 {
            // No losses: RSI saturates at 100, undefined when flat.
            (g > 0.0).then_some(100.0)
        } else {
            Some(100.0 - 100.0 / (1.0 + g / l))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(v: &[f64]) -> Series {
        v.iter().map(|&x| Some(x)).collect()
    }

    #[test]
    fn rolling_windows_warm_up() {
        let s = series(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rolling_mean(&s, 3), vec![None, None, Some(2.0), Some(3.0)]);
        let sd = rolling_std(&s, 2);
        assert!((sd[1].unwrap() - 0.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn ewm_without_adjustment() {
        let e = ewm(&series(&[2.0, 4.0]), 3);
        assert_eq!(e[0], Some(2.0));
        assert!((e[1].unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rsi_bounds() {
        let rising = rsi(&series(&[1.0, 2.0, 3.0, 4.0]), 14);
        assert_eq!(rising[0], None);
        assert_eq!(rising[3], Some(100.0));
        let mixed = rsi(&series(&[5.0, 4.0, 6.0, 5.5, 7.0]), 14);
        assert!(mixed[4].unwrap() > 0.0 && mixed[4].unwrap() < 100.0);
    }

    #[test]
    fn adds_all_columns() {
        let n = 30;
        let close: Vec<f64> = (0..n).map(|i| 10.0 + (i as f64 * 0.7).sin()).collect();
        let vol: Vec<f64> = (0..n).map(|i| 1000.0 + i as f64).collect();
        let mut ds = Dataset::from_columns(&[("close", close), ("vol", vol)]);
        add_technical_indicators(&mut ds).unwrap();
        for name in INDICATOR_COLUMNS {
            assert!(ds.has_column(name), "{name}");
        }
        assert_eq!(ds.value(3, "ma_5"), Some(&Value::Missing));
        assert!(matches!(ds.value(4, "ma_5"), Some(Value::Number(_))));
        assert!(matches!(ds.value(19, "bb_upper"), Some(Value::Number(_))));
        assert_eq!(ds.value(18, "bb_lower"), Some(&Value::Missing));
    }

    #[test]
    fn requires_close_and_volume() {
        let mut ds = Dataset::from_columns(&[("open", vec![1.0])]);
        assert!(matches!(add_technical_indicators(&mut ds), Err(Error::Data(_))));
    }
}
