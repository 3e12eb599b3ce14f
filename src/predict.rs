use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::checkpoint::bundle::CheckpointBundle;
use crate::checkpoint::store::CheckpointStore;
use crate::data::dataset::Dataset;
use crate::data::preprocess::FeatureSpec;
use crate::error::{Error, IoContext, Result};
use crate::math::matrix::Matrix;
use crate::network::network::NetworkModel;

/// Standard regression metrics in real target units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    /// `1 - ss_res / (ss_tot + 1e-10)`.
    pub r2: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
}

impl RegressionMetrics {
    /// `None` for empty or mismatched inputs.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<RegressionMetrics> {
        if actual.is_empty() || actual.len() != predicted.len() {
            return None;
        }
        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;
        let pairs = || actual.iter().zip(predicted);

        let ss_res: f64 = pairs().map(|(a, p)| (a - p).powi(2)).sum();
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        let mse = ss_res / n;
        Some(RegressionMetrics {
            mse,
            rmse: mse.sqrt(),
            mae: pairs().map(|(a, p)| (a - p).abs()).sum::<f64>() / n,
            r2: 1.0 - ss_res / (ss_tot + 1e-10),
            mape: pairs().map(|(a, p)| ((a - p) / (a + 1e-10)).abs()).sum::<f64>() / n * 100.0,
        })
    }
}

/// One predicted row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Row index in the input dataset.
    pub row: usize,
    pub predicted: f64,
    /// The target value, when the dataset has the target column.
    pub actual: Option<f64>,
}

/// A trained model ready for inference, loaded from a checkpoint bundle.
#[derive(Debug, Clone)]
pub struct Predictor {
    bundle: CheckpointBundle,
    model: NetworkModel,
}

impl Predictor {
    /// Opens and validates the bundle at `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Predictor> {
        let bundle = CheckpointStore::open(dir)?;
        let model = NetworkModel::from_parameters(bundle.parameters.clone(), bundle.config().activation);
        info!(
            "loaded model from {} ({} features, {} hidden)",
            bundle.path.display(),
            bundle.parameters.input_size(),
            bundle.parameters.hidden_size()
        );
        Ok(Predictor { bundle, model })
    }

    pub fn bundle(&self) -> &CheckpointBundle {
        &self.bundle
    }

    pub fn feature_spec(&self) -> FeatureSpec {
        self.bundle.feature_spec()
    }

    /// Predicts real-unit targets for raw feature rows in feature order.
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let norm = &self.bundle.normalization;
        let width = norm.feature_mean.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(Error::shape_mismatch("feature row", width.to_string(), bad.len().to_string()));
        }
        let mut x = norm.standardize(rows);
        x.cols = width;
        Ok(self.predict_standardized(&x))
    }

    fn predict_standardized(&self, x: &Matrix) -> Vec<f64> {
        let norm = &self.bundle.normalization;
        self.model.predict(x).flatten().into_iter().map(|v| norm.inverse_target(v)).collect()
    }

    /// Predicts every dataset row whose features are all numeric. Rows with
    /// missing features are skipped.
    pub fn predict(&self, dataset: &Dataset) -> Result<Vec<Prediction>> {
        let spec = self.feature_spec();
        let columns = spec
            .x_features
            .iter()
            .map(|c| dataset.numeric_column(c).ok_or_else(|| Error::Data(format!("column '{c}' not found"))))
            .collect::<Result<Vec<_>>>()?;
        let target = dataset.numeric_column(&spec.y_feature);

        let mut used = Vec::new();
        let mut rows = Vec::new();
        for i in 0..dataset.len() {
            if let Some(row) = columns.iter().map(|c| c[i]).collect::<Option<Vec<f64>>>() {
                used.push(i);
                rows.push(row);
            }
        }
        if used.len() < dataset.len() {
            warn!("skipped {} rows with missing feature values", dataset.len() - used.len());
        }

        let predicted = self.predict_rows(&rows)?;
        Ok(used
            .into_iter()
            .zip(predicted)
            .map(|(row, predicted)| Prediction {
                row,
                predicted,
                actual: target.as_ref().and_then(|t| t[row]),
            })
            .collect())
    }

    /// Metrics over the rows that have both a prediction and a target.
    pub fn evaluate(&self, dataset: &Dataset) -> Result<RegressionMetrics> {
        let (actual, predicted): (Vec<f64>, Vec<f64>) = self
            .predict(dataset)?
            .into_iter()
            .filter_map(|p| p.actual.map(|a| (a, p.predicted)))
            .unzip();
        RegressionMetrics::compute(&actual, &predicted)
            .ok_or_else(|| Error::Data(format!("no rows with a '{}' value to evaluate", self.bundle.feature_info.y_feature)))
    }
}

/// Writes predictions as `row,predicted,actual,error`.
pub fn write_predictions_csv(path: &Path, predictions: &[Prediction]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| Error::format(path, e.to_string()))?;
    wtr.write_record(["row", "predicted", "actual", "error"]).map_err(|e| Error::format(path, e.to_string()))?;
    for p in predictions {
        let actual = p.actual.map(|a| a.to_string()).unwrap_or_default();
        let error = p.actual.map(|a| (a - p.predicted).to_string()).unwrap_or_default();
        wtr.write_record([p.row.to_string(), p.predicted.to_string(), actual, error])
            .map_err(|e| Error::format(path, e.to_string()))?;
    }
    wtr.flush().at(path)
}
