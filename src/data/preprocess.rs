use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::data::dataset::Dataset;
use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Replaces zero standard deviations and zero target ranges.
pub const NORM_EPSILON: f64 = 1e-8;

/// Default fraction of rows used for training.
pub const DEFAULT_SPLIT_RATIO: f64 = 0.8;

/// Ordered feature columns plus the target column.
///
/// The order of `x_features` fixes the layout of every input vector, so it
/// is persisted with the model and reused at prediction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub x_features: Vec<String>,
    pub y_feature: String,
}

impl FeatureSpec {
    pub fn new<S: Into<String>>(x_features: impl IntoIterator<Item = S>, y_feature: impl Into<String>) -> FeatureSpec {
        FeatureSpec {
            x_features: x_features.into_iter().map(Into::into).collect(),
            y_feature: y_feature.into(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.x_features.len()
    }

    fn required_columns(&self) -> impl Iterator<Item = &str> {
        self.x_features.iter().map(String::as_str).chain(std::iter::once(self.y_feature.as_str()))
    }
}

/// Feature standardization and target range-scaling parameters, computed
/// from the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub feature_mean: Vec<f64>,
    pub feature_std: Vec<f64>,
    pub target_min: f64,
    pub target_max: f64,
}

impl NormalizationParams {
    /// Fits the parameters on raw training rows and targets.
    pub fn fit(features: &[Vec<f64>], targets: &[f64]) -> NormalizationParams {
        let n = features.len().max(1) as f64;
        let width = features.first().map_or(0, |r| r.len());

        let mut feature_mean = vec![0.0; width];
        for row in features {
            for (m, v) in feature_mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        feature_mean.iter_mut().for_each(|m| *m /= n);

        let mut feature_std = vec![0.0; width];
        for row in features {
            for ((s, v), m) in feature_std.iter_mut().zip(row).zip(&feature_mean) {
                *s += (v - m).powi(2);
            }
        }
        for s in feature_std.iter_mut() {
            *s = (*s / n).sqrt();
            if *s == 0.0 {
                *s = NORM_EPSILON;
            }
        }

        let target_min = targets.iter().copied().fold(f64::INFINITY, f64::min);
        let target_max = targets.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        NormalizationParams { feature_mean, feature_std, target_min, target_max }
    }

    /// Width of the target range actually used for scaling.
    pub fn target_range(&self) -> f64 {
        let range = self.target_max - self.target_min;
        if range > 0.0 { range } else { NORM_EPSILON }
    }

    /// `(x - mean) / std` for one raw feature row.
    pub fn standardize_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.feature_mean.iter().zip(&self.feature_std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn standardize(&self, rows: &[Vec<f64>]) -> Matrix {
        Matrix::from_data(rows.iter().map(|r| self.standardize_row(r)).collect())
    }

    /// Maps a raw target into the training range's [0, 1] scale.
    pub fn scale_target(&self, y: f64) -> f64 {
        (y - self.target_min) / self.target_range()
    }

    /// Exact inverse of [`scale_target`](Self::scale_target).
    pub fn inverse_target(&self, scaled: f64) -> f64 {
        scaled * self.target_range() + self.target_min
    }
}

/// Training and validation matrices plus everything needed to persist them.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x_train: Matrix,
    pub y_train: Matrix,
    /// Empty (0 rows) when there is no validation split.
    pub x_val: Matrix,
    pub y_val: Matrix,
    pub norm: NormalizationParams,
    pub feature_spec: FeatureSpec,
    /// Cleaned rows in raw units: features followed by the target.
    pub raw_rows: Vec<Vec<f64>>,
}

impl PreparedData {
    pub fn has_validation(&self) -> bool {
        self.x_val.rows > 0
    }

    /// Standardized inputs and scaled targets for every cleaned row.
    pub fn full(&self) -> (Matrix, Matrix) {
        normalized_matrices(&self.raw_rows, &self.norm)
    }
}

/// Applies stored normalization to raw rows laid out as features + target.
pub fn normalized_matrices(raw_rows: &[Vec<f64>], norm: &NormalizationParams) -> (Matrix, Matrix) {
    let width = norm.feature_mean.len();
    let mut x = Matrix::from_data(raw_rows.iter().map(|r| norm.standardize_row(&r[..width])).collect());
    // An empty split still has the feature width.
    x.cols = width;
    let y: Vec<f64> = raw_rows.iter().map(|r| norm.scale_target(r[width])).collect();
    (x, Matrix::column(&y))
}

/// Selects, cleans, splits and normalizes dataset columns.
#[derive(Debug, Clone)]
pub struct DataPreprocessor {
    /// Minimum number of usable rows after cleaning.
    pub min_rows: usize,
}

impl Default for DataPreprocessor {
    fn default() -> Self {
        DataPreprocessor { min_rows: 5 }
    }
}

impl DataPreprocessor {
    pub fn new() -> DataPreprocessor {
        DataPreprocessor::default()
    }

    pub fn prepare(&self, dataset: &Dataset, spec: &FeatureSpec, split_ratio: f64) -> Result<PreparedData> {
        if spec.x_features.is_empty() {
            return Err(Error::Config("at least one feature column is required".into()));
        }
        if !(split_ratio > 0.0 && split_ratio <= 1.0) {
            return Err(Error::Config(format!("split ratio must be in (0, 1], got {split_ratio}")));
        }
        if let Some(missing) = spec.required_columns().find(|c| !dataset.has_column(c)) {
            return Err(Error::Data(format!(
                "column '{missing}' not found; available columns: {}",
                dataset.columns().join(", ")
            )));
        }

        let columns: Vec<Vec<Option<f64>>> = spec
            .required_columns()
            .map(|c| dataset.numeric_column(c).unwrap_or_default())
            .collect();

        let raw_rows: Vec<Vec<f64>> = (0..dataset.len())
            .filter_map(|i| columns.iter().map(|col| col[i]).collect::<Option<Vec<f64>>>())
            .collect();

        let dropped = dataset.len() - raw_rows.len();
        if dropped > 0 {
            warn!("dropped {dropped} of {} rows with missing or non-numeric values", dataset.len());
        }
        if raw_rows.len() < self.min_rows {
            return Err(Error::Data(format!(
                "only {} usable rows after cleaning, need at least {}",
                raw_rows.len(),
                self.min_rows
            )));
        }

        let n = raw_rows.len();
        let n_train = ((n as f64 * split_ratio).floor() as usize).clamp(1, n);
        let width = spec.input_size();
        let (train, val) = raw_rows.split_at(n_train);

        let train_x: Vec<Vec<f64>> = train.iter().map(|r| r[..width].to_vec()).collect();
        let train_y: Vec<f64> = train.iter().map(|r| r[width]).collect();
        let norm = NormalizationParams::fit(&train_x, &train_y);

        let (x_train, y_train) = normalized_matrices(train, &norm);
        let (x_val, y_val) = normalized_matrices(val, &norm);

        info!("prepared {n_train} training and {} validation rows with {width} features", val.len());

        Ok(PreparedData {
            x_train,
            y_train,
            x_val,
            y_val,
            norm,
            feature_spec: spec.clone(),
            raw_rows,
        })
    }
}
