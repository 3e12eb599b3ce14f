use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::preprocess::{FeatureSpec, NormalizationParams};
use crate::error::Result;
use crate::network::params::ModelParameters;
use crate::train::epoch_stats::{EpochRecord, WeightSnapshot};
use crate::train::session::SessionState;
use crate::train::train_config::TrainConfig;

/// Every file a checkpoint directory can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Model,
    FeatureInfo,
    ScalerMean,
    ScalerStd,
    TargetMin,
    TargetMax,
    LossHistory,
    WeightsHistory,
    Metadata,
    TrainingData,
}

impl Artifact {
    pub const ALL: [Artifact; 10] = [
        Artifact::Model,
        Artifact::FeatureInfo,
        Artifact::ScalerMean,
        Artifact::ScalerStd,
        Artifact::TargetMin,
        Artifact::TargetMax,
        Artifact::LossHistory,
        Artifact::WeightsHistory,
        Artifact::Metadata,
        Artifact::TrainingData,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Model => "stock_model.npz",
            Artifact::FeatureInfo => "feature_info.json",
            Artifact::ScalerMean => "scaler_mean.csv",
            Artifact::ScalerStd => "scaler_std.csv",
            Artifact::TargetMin => "target_min.csv",
            Artifact::TargetMax => "target_max.csv",
            Artifact::LossHistory => "training_losses.csv",
            Artifact::WeightsHistory => "weights_history",
            Artifact::Metadata => "training_metadata.json",
            Artifact::TrainingData => "training_data.csv",
        }
    }

    /// Prediction needs every required artifact; the rest only enrich
    /// visualization and reporting.
    pub fn is_required(&self) -> bool {
        !matches!(self, Artifact::WeightsHistory | Artifact::Metadata | Artifact::TrainingData)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Contents of `feature_info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub x_features: Vec<String>,
    pub y_feature: String,
    pub training_params: TrainConfig,
}

impl FeatureInfo {
    pub fn new(spec: &FeatureSpec, config: &TrainConfig) -> FeatureInfo {
        FeatureInfo {
            x_features: spec.x_features.clone(),
            y_feature: spec.y_feature.clone(),
            training_params: config.clone(),
        }
    }

    pub fn feature_spec(&self) -> FeatureSpec {
        FeatureSpec::new(self.x_features.iter().cloned(), self.y_feature.clone())
    }
}

/// Contents of `training_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub completed_at: DateTime<Utc>,
    pub outcome: SessionState,
    pub epochs_run: usize,
    /// `0` when no epoch completed.
    pub best_epoch: usize,
    pub best_loss: Option<f64>,
    pub final_train_loss: Option<f64>,
    pub final_val_loss: Option<f64>,
}

/// Everything written when a run finishes.
#[derive(Debug, Clone, Copy)]
pub struct FinalArtifacts<'a> {
    pub params: &'a ModelParameters,
    pub feature_spec: &'a FeatureSpec,
    pub norm: &'a NormalizationParams,
    pub config: &'a TrainConfig,
    pub metadata: &'a TrainingMetadata,
    /// Cleaned raw rows (features then target), for offline surfaces.
    pub training_data: Option<&'a [Vec<f64>]>,
}

/// A snapshot file on disk, not yet loaded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotRef {
    pub epoch: usize,
    pub path: PathBuf,
}

impl SnapshotRef {
    pub fn load(&self) -> Result<WeightSnapshot> {
        crate::checkpoint::store::read_snapshot(self)
    }
}

/// A finished checkpoint directory, loaded for prediction or visualization.
///
/// Snapshots stay on disk; use [`snapshots`](Self::snapshots) to stream them.
#[derive(Debug, Clone)]
pub struct CheckpointBundle {
    pub path: PathBuf,
    pub parameters: ModelParameters,
    pub feature_info: FeatureInfo,
    pub normalization: NormalizationParams,
    pub history: Vec<EpochRecord>,
    pub snapshot_refs: Vec<SnapshotRef>,
    pub metadata: Option<TrainingMetadata>,
}

impl CheckpointBundle {
    pub fn feature_spec(&self) -> FeatureSpec {
        self.feature_info.feature_spec()
    }

    pub fn config(&self) -> &TrainConfig {
        &self.feature_info.training_params
    }

    /// Loads snapshots one at a time, in epoch order.
    pub fn snapshots(&self) -> impl Iterator<Item = Result<WeightSnapshot>> + '_ {
        self.snapshot_refs.iter().map(SnapshotRef::load)
    }

    /// Cleaned training rows, if the bundle carries them.
    pub fn training_data(&self) -> Result<Option<Vec<Vec<f64>>>> {
        crate::checkpoint::store::read_training_data(&self.path, &self.feature_spec())
    }
}
