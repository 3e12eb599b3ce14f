use serde::{Deserialize, Serialize};

use crate::activation::activation::Activation;
use crate::data::preprocess::DEFAULT_SPLIT_RATIO;
use crate::error::{Error, Result};
use crate::network::params::{ModelParameters, WeightCoord};
use crate::optim::adam::AdamSettings;

/// Largest epoch count a run may request; snapshot file names are padded to
/// six digits so lexicographic order stays epoch order.
pub const MAX_EPOCHS: usize = 999_999;

/// Hyperparameters for one training run.
///
/// Serialized verbatim into `feature_info.json` as `training_params`. Every
/// field has a default, so a config file only needs the values it changes.
///
/// # Fields
/// - `hidden_size`    : hidden units; fixed for the lifetime of the model
/// - `optimizer`      : Adam learning rate, betas and epsilon
/// - `batch_size`     : samples per mini-batch
/// - `epochs`         : maximum full passes over the training split
/// - `patience`       : non-improving epochs before stopping early; `0` disables
/// - `min_delta`      : an epoch improves only if `loss < best - min_delta`
/// - `snapshot_every` : weight snapshot stride; the last epoch is always kept
/// - `trajectory_axes`: the two coordinates reported on every progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub hidden_size: usize,
    pub activation: Activation,
    #[serde(flatten)]
    pub optimizer: AdamSettings,
    pub batch_size: usize,
    pub epochs: usize,
    pub patience: usize,
    pub min_delta: f64,
    pub seed: u64,
    pub shuffle: bool,
    pub snapshot_every: usize,
    pub split_ratio: f64,
    pub trajectory_axes: [WeightCoord; 2],
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            hidden_size: 4,
            activation: Activation::Tanh,
            optimizer: AdamSettings::default(),
            batch_size: 32,
            epochs: 1000,
            patience: 20,
            min_delta: 0.0,
            seed: 42,
            shuffle: true,
            snapshot_every: 1,
            split_ratio: DEFAULT_SPLIT_RATIO,
            trajectory_axes: [WeightCoord::w1(0, 0), WeightCoord::w2(0)],
        }
    }
}

impl TrainConfig {
    /// Rejects any hyperparameter the training loop cannot run with.
    /// Invalid values are never replaced by defaults.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::Config(msg));
        let AdamSettings { learning_rate, beta1, beta2, epsilon } = self.optimizer;

        if self.hidden_size == 0 {
            return bad("hidden_size must be greater than 0".into());
        }
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return bad(format!("learning_rate must be a positive number, got {learning_rate}"));
        }
        if !(1..=MAX_EPOCHS).contains(&self.epochs) {
            return bad(format!("epochs must be between 1 and {MAX_EPOCHS}, got {}", self.epochs));
        }
        if self.batch_size == 0 {
            return bad("batch_size must be greater than 0".into());
        }
        if self.snapshot_every == 0 {
            return bad("snapshot_every must be greater than 0".into());
        }
        for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return bad(format!("{name} must be in [0, 1), got {beta}"));
            }
        }
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return bad(format!("epsilon must be a positive number, got {epsilon}"));
        }
        if !(self.min_delta.is_finite() && self.min_delta >= 0.0) {
            return bad(format!("min_delta must be a non-negative number, got {}", self.min_delta));
        }
        if !(self.split_ratio > 0.0 && self.split_ratio <= 1.0) {
            return bad(format!("split_ratio must be in (0, 1], got {}", self.split_ratio));
        }
        Ok(())
    }

    /// Checks the trajectory axes against the parameter shapes this config
    /// produces for `input_size` features.
    pub fn validate_axes(&self, input_size: usize) -> Result<()> {
        let shape = ModelParameters::zeros(input_size, self.hidden_size);
        for axis in &self.trajectory_axes {
            axis.validate(&shape)?;
        }
        if self.trajectory_axes[0] == self.trajectory_axes[1] {
            return Err(Error::Config(format!(
                "trajectory axes must be distinct, both are {}",
                self.trajectory_axes[0]
            )));
        }
        Ok(())
    }

    /// Whether `epoch` gets a weight snapshot: epochs 1, 1+N, 1+2N, … plus
    /// `last_epoch`.
    pub fn snapshot_due(&self, epoch: usize, last_epoch: bool) -> bool {
        last_epoch || (epoch - 1) % self.snapshot_every == 0
    }
}
