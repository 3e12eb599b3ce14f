//! End-to-end runs shared by the command-line tool and the monitor server:
//! load a dataset, train into a checkpoint directory, then optionally
//! replay the trajectory over a reconstructed loss surface.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::checkpoint::store::CheckpointStore;
use crate::data::dataset::Dataset;
use crate::data::indicators::add_technical_indicators;
use crate::data::preprocess::{DataPreprocessor, FeatureSpec, PreparedData};
use crate::error::{Error, IoContext, Result};
use crate::surface::config::VisualizationConfig;
use crate::surface::reconstruct::{SurfaceReconstructor, SurfaceRequest};
use crate::surface::render::{render_frame, save_frame_png, RenderOptions};
use crate::surface::trajectory::Animation;
use crate::train::events::EventSink;
use crate::train::session::{TrainingOutcome, TrainingSession};
use crate::train::train_config::TrainConfig;

/// Everything one run needs, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// A CSV file, or a directory whose CSV files are concatenated.
    pub data: PathBuf,
    pub model_dir: PathBuf,
    #[serde(flatten)]
    pub features: FeatureSpec,
    /// Derive the moving-average and momentum columns before selecting features.
    #[serde(default)]
    pub with_indicators: bool,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub visualization: Option<VisualizationConfig>,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<RunConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).at(path)?;
        serde_json::from_str(&text).map_err(|e| Error::format(path, e.to_string()))
    }

    pub fn load_dataset(&self) -> Result<Dataset> {
        let mut dataset = if self.data.is_dir() {
            Dataset::load_dir(&self.data)?
        } else {
            Dataset::load_csv(&self.data)?
        };
        if self.with_indicators {
            add_technical_indicators(&mut dataset)?;
        }
        info!("loaded {} rows from {}", dataset.len(), self.data.display());
        Ok(dataset)
    }

    pub fn prepare(&self) -> Result<PreparedData> {
        let dataset = self.load_dataset()?;
        DataPreprocessor::new().prepare(&dataset, &self.features, self.train.split_ratio)
    }

    /// Trains with `session` into `model_dir`.
    pub fn train(&self, session: &mut TrainingSession, sink: &mut dyn EventSink) -> Result<TrainingOutcome> {
        let data = self.prepare()?;
        session.run(&self.train, &data, &self.model_dir, sink)
    }
}

/// `frame_0007.png` for index 7.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:04}.png")
}

/// Reconstructs the loss surface of the bundle in `model_dir` and writes one
/// PNG per recorded snapshot. Returns the written paths in frame order.
pub fn render_animation(model_dir: &Path, vis: &VisualizationConfig) -> Result<Vec<PathBuf>> {
    let bundle = CheckpointStore::open(model_dir)?;
    let reconstructor = SurfaceReconstructor::from_bundle(&bundle, vis.axes, vis.sample_limit)?;
    let request = SurfaceRequest { range1: vis.range1, range2: vis.range2, resolution: vis.resolution };
    let surface = reconstructor.compute_surface(&request)?;
    let animation = Animation::new(&reconstructor, &surface, bundle.snapshot_refs.iter().cloned());

    let out_dir = vis.frames_dir(model_dir);
    std::fs::create_dir_all(&out_dir).at(&out_dir)?;
    let options = RenderOptions::from(vis);

    let mut written = Vec::with_capacity(animation.len());
    for frame in animation.frames() {
        let frame = frame?;
        let path = out_dir.join(frame_file_name(frame.index));
        save_frame_png(&render_frame(&surface, &frame, &options)?, &path)?;
        written.push(path);
    }
    info!("wrote {} frames to {}", written.len(), out_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_reads_flat_feature_fields() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{
                "data": "prices.csv",
                "model_dir": "model",
                "x_features": ["open", "high"],
                "y_feature": "close",
                "train": {"epochs": 5, "learning_rate": 0.01}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.features, FeatureSpec::new(["open", "high"], "close"));
        assert_eq!(cfg.train.epochs, 5);
        assert_eq!(cfg.train.optimizer.learning_rate, 0.01);
        assert_eq!(cfg.train.batch_size, TrainConfig::default().batch_size);
        assert!(!cfg.with_indicators);
        assert!(cfg.visualization.is_none());
        assert_eq!(frame_file_name(7), "frame_0007.png");
    }
}
