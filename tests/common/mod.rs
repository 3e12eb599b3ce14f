#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use stock_net::{DataPreprocessor, Dataset, FeatureSpec, PreparedData, TrainConfig};

/// Deterministic daily bars: a slow trend with two overlapping cycles.
pub fn ohlcv_rows(n: usize) -> Vec<[f64; 5]> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 0.15 * t + 4.0 * (t * 0.21).sin() + 1.5 * (t * 0.57).cos();
            let open = close - 0.8 * (t * 0.33).sin();
            let high = open.max(close) + 0.6 + 0.2 * (t * 0.7).cos().abs();
            let low = open.min(close) - 0.5 - 0.2 * (t * 0.9).sin().abs();
            let vol = 1_000_000.0 + 50_000.0 * (t * 0.13).sin();
            [open, high, low, close, vol]
        })
        .collect()
}

pub fn ohlcv_dataset(n: usize) -> Dataset {
    let rows = ohlcv_rows(n);
    let col = |k: usize| rows.iter().map(|r| r[k]).collect::<Vec<f64>>();
    Dataset::from_columns(&[("open", col(0)), ("high", col(1)), ("low", col(2)), ("close", col(3)), ("vol", col(4))])
}

/// Writes `n` bars as `date,open,high,low,close,vol`.
pub fn write_ohlcv_csv(path: &Path, n: usize) -> PathBuf {
    let mut text = String::from("date,open,high,low,close,vol\n");
    for (i, r) in ohlcv_rows(n).iter().enumerate() {
        writeln!(text, "2024-01-{:02}T{:02}:00,{},{},{},{},{}", i % 28 + 1, i % 24, r[0], r[1], r[2], r[3], r[4]).unwrap();
    }
    std::fs::write(path, text).unwrap();
    path.to_path_buf()
}

pub fn feature_spec() -> FeatureSpec {
    FeatureSpec::new(["open", "high", "low", "vol"], "close")
}

pub fn prepared(n: usize) -> PreparedData {
    DataPreprocessor::new().prepare(&ohlcv_dataset(n), &feature_spec(), 0.8).unwrap()
}

pub fn small_config(epochs: usize) -> TrainConfig {
    TrainConfig { epochs, batch_size: 16, hidden_size: 4, ..TrainConfig::default() }
}
