use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::checkpoint::bundle::{
    Artifact, CheckpointBundle, FeatureInfo, FinalArtifacts, SnapshotRef, TrainingMetadata,
};
use crate::checkpoint::lock::DirLock;
use crate::checkpoint::npz;
use crate::data::preprocess::{FeatureSpec, NormalizationParams};
use crate::error::{Error, IoContext, Result};
use crate::math::matrix::Matrix;
use crate::network::params::{ModelParameters, ParamTensor};
use crate::train::epoch_stats::{EpochRecord, WeightSnapshot};

const SNAPSHOT_PREFIX: &str = "weights_history_";
const SNAPSHOT_EXT: &str = ".npz";
const STAGING_DIR: &str = ".staging";
const LOSS_HEADER: [&str; 4] = ["epoch", "train_loss", "val_loss", "timestamp"];

/// Which artifacts a directory lacks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    /// Required artifacts that are absent. Non-empty means invalid.
    pub missing: Vec<String>,
    /// Optional artifacts that are absent.
    pub optional_missing: Vec<String>,
    pub valid: bool,
}

/// Write side of a checkpoint directory for one training run.
///
/// Holds the directory lock until dropped. The loss history and snapshots are
/// appended as training progresses; the final artifacts are written once by
/// [`finalize`](Self::finalize).
pub struct CheckpointStore {
    dir: PathBuf,
    history: csv::Writer<File>,
    _lock: DirLock,
}

impl CheckpointStore {
    /// Prepares `dir` for a new run: takes the lock, refuses a directory that
    /// already holds a finished model or the history and snapshots of an
    /// earlier run, writes the loss history header and creates
    /// `weights_history/`.
    pub fn create(dir: impl AsRef<Path>) -> Result<CheckpointStore> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).at(&dir)?;
        let lock = DirLock::acquire(&dir)?;

        if Artifact::Model.path_in(&dir).exists() {
            return Err(Error::Config(format!(
                "{} already contains a trained model; use a new directory for each run",
                dir.display()
            )));
        }

        // A failed run leaves its history and snapshots for diagnosis.
        let left = list_snapshots(&dir)?.len();
        let history_path = Artifact::LossHistory.path_in(&dir);
        if left > 0 || has_history_rows(&history_path)? {
            return Err(Error::Config(format!(
                "{} holds the loss history or {left} snapshots of an earlier run; use a new directory for each run",
                dir.display()
            )));
        }

        let snapshots_dir = Artifact::WeightsHistory.path_in(&dir);
        fs::create_dir_all(&snapshots_dir).at(&snapshots_dir)?;

        let file = File::create(&history_path).at(&history_path)?;
        let mut history = csv::Writer::from_writer(file);
        history.write_record(LOSS_HEADER).map_err(|e| csv_error(&history_path, e))?;
        history.flush().at(&history_path)?;

        info!("checkpoint directory ready at {}", dir.display());
        Ok(CheckpointStore { dir, history, _lock: lock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one loss history line and flushes it.
    pub fn append_epoch(&mut self, record: &EpochRecord) -> Result<()> {
        let path = Artifact::LossHistory.path_in(&self.dir);
        let val = record.val_loss.map(|v| v.to_string()).unwrap_or_default();
        let ts = record.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default();
        self.history
            .write_record([record.epoch.to_string(), record.train_loss.to_string(), val, ts])
            .map_err(|e| csv_error(&path, e))?;
        self.history.flush().at(&path)
    }

    /// Writes one snapshot through a temporary file, so a reader never sees
    /// a partial snapshot.
    pub fn write_snapshot(&self, snapshot: &WeightSnapshot) -> Result<PathBuf> {
        let dir = Artifact::WeightsHistory.path_in(&self.dir);
        let path = dir.join(snapshot_file_name(snapshot.epoch));
        let tmp = dir.join(format!(".{}.tmp", snapshot_file_name(snapshot.epoch)));
        write_params(&tmp, &snapshot.params)?;
        fs::rename(&tmp, &path).at(&path)?;
        debug!("wrote snapshot for epoch {}", snapshot.epoch);
        Ok(path)
    }

    /// Writes every final artifact into a staging directory, then moves them
    /// into place with `stock_model.npz` last.
    pub fn finalize(&self, artifacts: &FinalArtifacts<'_>) -> Result<()> {
        let staging = self.dir.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging).at(&staging)?;
        }
        fs::create_dir(&staging).at(&staging)?;

        let norm = artifacts.norm;
        write_json(
            &Artifact::FeatureInfo.path_in(&staging),
            &FeatureInfo::new(artifacts.feature_spec, artifacts.config),
        )?;
        write_values(&Artifact::ScalerMean.path_in(&staging), &norm.feature_mean)?;
        write_values(&Artifact::ScalerStd.path_in(&staging), &norm.feature_std)?;
        write_values(&Artifact::TargetMin.path_in(&staging), &[norm.target_min])?;
        write_values(&Artifact::TargetMax.path_in(&staging), &[norm.target_max])?;
        write_json(&Artifact::Metadata.path_in(&staging), artifacts.metadata)?;

        let mut order = vec![
            Artifact::FeatureInfo,
            Artifact::ScalerMean,
            Artifact::ScalerStd,
            Artifact::TargetMin,
            Artifact::TargetMax,
            Artifact::Metadata,
        ];
        if let Some(rows) = artifacts.training_data {
            write_training_data(&Artifact::TrainingData.path_in(&staging), artifacts.feature_spec, rows)?;
            order.push(Artifact::TrainingData);
        }
        write_params(&Artifact::Model.path_in(&staging), artifacts.params)?;
        order.push(Artifact::Model);

        for artifact in order {
            let dest = artifact.path_in(&self.dir);
            fs::rename(artifact.path_in(&staging), &dest).at(&dest)?;
        }
        fs::remove_dir(&staging).at(&staging)?;

        info!("checkpoint bundle finalized at {}", self.dir.display());
        Ok(())
    }

    /// Reports which artifacts `dir` is missing without reading any of them.
    pub fn validate(dir: impl AsRef<Path>) -> ValidationResult {
        let dir = dir.as_ref();
        let mut result = ValidationResult::default();
        for artifact in Artifact::ALL {
            let present = match artifact {
                Artifact::WeightsHistory => list_snapshots(dir).map_or(false, |s| !s.is_empty()),
                other => other.path_in(dir).is_file(),
            };
            if present {
                continue;
            }
            let name = artifact.file_name().to_owned();
            if artifact.is_required() {
                result.missing.push(name);
            } else {
                result.optional_missing.push(name);
            }
        }
        result.valid = result.missing.is_empty();
        result
    }

    /// Loads a finished bundle. Fails with `InvalidBundle` listing every
    /// missing required artifact, or `ShapeMismatch` when the stored tensors
    /// disagree with the recorded features and hidden size.
    pub fn open(dir: impl AsRef<Path>) -> Result<CheckpointBundle> {
        let dir = dir.as_ref();
        let validation = CheckpointStore::validate(dir);
        if !validation.valid {
            return Err(Error::InvalidBundle { path: dir.to_path_buf(), missing: validation.missing });
        }

        let feature_info: FeatureInfo = read_json(&Artifact::FeatureInfo.path_in(dir))?;
        let features = feature_info.x_features.len();
        let hidden = feature_info.training_params.hidden_size;

        let parameters = read_params(&Artifact::Model.path_in(dir))?;
        parameters.check_shapes(features, hidden)?;

        let normalization = NormalizationParams {
            feature_mean: read_values(&Artifact::ScalerMean.path_in(dir))?,
            feature_std: read_values(&Artifact::ScalerStd.path_in(dir))?,
            target_min: read_scalar(&Artifact::TargetMin.path_in(dir))?,
            target_max: read_scalar(&Artifact::TargetMax.path_in(dir))?,
        };
        for (what, values) in [("scaler_mean", &normalization.feature_mean), ("scaler_std", &normalization.feature_std)] {
            if values.len() != features {
                return Err(Error::shape_mismatch(what, features.to_string(), values.len().to_string()));
            }
        }

        let metadata_path = Artifact::Metadata.path_in(dir);
        let metadata = if metadata_path.is_file() { Some(read_json::<TrainingMetadata>(&metadata_path)?) } else { None };

        Ok(CheckpointBundle {
            path: dir.to_path_buf(),
            parameters,
            feature_info,
            normalization,
            history: read_loss_history(&Artifact::LossHistory.path_in(dir))?,
            snapshot_refs: list_snapshots(dir)?,
            metadata,
        })
    }
}

/// `weights_history_000042.npz`; lexicographic order is epoch order.
/// Whether a loss history file has any line past its header.
fn has_history_rows(path: &Path) -> Result<bool> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.lines().skip(1).any(|l| !l.trim().is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

pub fn snapshot_file_name(epoch: usize) -> String {
    format!("{SNAPSHOT_PREFIX}{epoch:06}{SNAPSHOT_EXT}")
}

fn parse_snapshot_epoch(name: &str) -> Option<usize> {
    let digits = name.strip_prefix(SNAPSHOT_PREFIX)?.strip_suffix(SNAPSHOT_EXT)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Snapshot files under `dir/weights_history`, sorted by epoch. A missing
/// directory yields an empty list.
pub fn list_snapshots(dir: &Path) -> Result<Vec<SnapshotRef>> {
    let snapshots_dir = Artifact::WeightsHistory.path_in(dir);
    if !snapshots_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut refs: Vec<SnapshotRef> = fs::read_dir(&snapshots_dir)
        .at(&snapshots_dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let epoch = parse_snapshot_epoch(path.file_name()?.to_str()?)?;
            Some(SnapshotRef { epoch, path })
        })
        .collect();
    refs.sort();
    Ok(refs)
}

pub(crate) fn read_snapshot(snapshot: &SnapshotRef) -> Result<WeightSnapshot> {
    Ok(WeightSnapshot { epoch: snapshot.epoch, params: read_params(&snapshot.path)? })
}

/// Writes `W1`, `b1`, `W2`, `b2` as an NPZ file.
pub fn write_params(path: &Path, params: &ModelParameters) -> Result<()> {
    let arrays: Vec<(&str, &Matrix)> = ParamTensor::ALL.iter().map(|&t| (t.name(), params.tensor(t))).collect();
    npz::write_file(path, &arrays)
}

/// Reads parameters written by [`write_params`]. Only checks that all four
/// tensors exist and agree with each other.
pub fn read_params(path: &Path) -> Result<ModelParameters> {
    let mut arrays = npz::read_file(path)?;
    let mut take = |t: ParamTensor| -> Result<Matrix> {
        let pos = arrays
            .iter()
            .position(|(name, _)| name == t.name())
            .ok_or_else(|| Error::format(path, format!("array '{}' not found", t.name())))?;
        Ok(arrays.swap_remove(pos).1)
    };
    let params = ModelParameters {
        w1: take(ParamTensor::W1)?,
        b1: take(ParamTensor::B1)?,
        w2: take(ParamTensor::W2)?,
        b2: take(ParamTensor::B2)?,
    };
    params.check_shapes(params.input_size(), params.hidden_size())?;
    Ok(params)
}

/// Parses `training_losses.csv`. `val_loss` may be empty and `timestamp`
/// may be absent; epochs must run 1, 2, 3, … without gaps.
pub fn read_loss_history(path: &Path) -> Result<Vec<EpochRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    let headers = rdr.headers().map_err(|e| csv_error(path, e))?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let epoch_col = column("epoch").ok_or_else(|| Error::format(path, "missing 'epoch' column"))?;
    let train_col = column("train_loss").ok_or_else(|| Error::format(path, "missing 'train_loss' column"))?;
    let val_col = column("val_loss");
    let ts_col = column("timestamp");

    let mut records = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| csv_error(path, e))?;
        let field = |col: Option<usize>| col.and_then(|c| row.get(c)).filter(|s| !s.is_empty());
        let bad = |what: &str| Error::format(path, format!("line {}: invalid {what}", i + 2));

        let epoch: usize = field(Some(epoch_col)).and_then(|s| s.parse().ok()).ok_or_else(|| bad("epoch"))?;
        if epoch != i + 1 {
            return Err(Error::format(path, format!("expected epoch {}, found {epoch}", i + 1)));
        }
        let train_loss: f64 = field(Some(train_col)).and_then(|s| s.parse().ok()).ok_or_else(|| bad("train_loss"))?;
        let val_loss = match field(val_col) {
            Some(s) => Some(s.parse::<f64>().map_err(|_| bad("val_loss"))?),
            None => None,
        };
        let timestamp = match field(ts_col) {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s).map_err(|_| bad("timestamp"))?.with_timezone(&Utc),
            ),
            None => None,
        };
        records.push(EpochRecord { epoch, train_loss, val_loss, timestamp });
    }
    Ok(records)
}

fn write_training_data(path: &Path, spec: &FeatureSpec, rows: &[Vec<f64>]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    let header = spec.x_features.iter().chain(std::iter::once(&spec.y_feature));
    wtr.write_record(header).map_err(|e| csv_error(path, e))?;
    for row in rows {
        wtr.write_record(row.iter().map(|v| v.to_string())).map_err(|e| csv_error(path, e))?;
    }
    wtr.flush().at(path)
}

/// Reads `training_data.csv` back as rows laid out like `spec`: features
/// then target. `None` when the bundle has no training data.
pub(crate) fn read_training_data(dir: &Path, spec: &FeatureSpec) -> Result<Option<Vec<Vec<f64>>>> {
    let path = Artifact::TrainingData.path_in(dir);
    if !path.is_file() {
        return Ok(None);
    }
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(&path).map_err(|e| csv_error(&path, e))?;
    let headers = rdr.headers().map_err(|e| csv_error(&path, e))?.clone();
    let columns: Vec<usize> = spec
        .x_features
        .iter()
        .chain(std::iter::once(&spec.y_feature))
        .map(|name| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| Error::format(&path, format!("missing column '{name}'")))
        })
        .collect::<Result<_>>()?;

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| csv_error(&path, e))?;
        let row = columns
            .iter()
            .map(|&c| record.get(c).and_then(|s| s.parse::<f64>().ok()))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| Error::format(&path, format!("line {}: non-numeric value", i + 2)))?;
        rows.push(row);
    }
    Ok(Some(rows))
}

/// One value per line.
fn write_values(path: &Path, values: &[f64]) -> Result<()> {
    let text: String = values.iter().map(|v| format!("{v}\n")).collect();
    fs::write(path, text).at(path)
}

fn read_values(path: &Path) -> Result<Vec<f64>> {
    let text = fs::read_to_string(path).at(path)?;
    text.split(|c: char| c == '\n' || c == ',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| Error::format(path, format!("'{s}' is not a number"))))
        .collect()
}

fn read_scalar(path: &Path) -> Result<f64> {
    match read_values(path)?.as_slice() {
        [v] => Ok(*v),
        other => Err(Error::format(path, format!("expected a single value, found {}", other.len()))),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = OpenOptions::new().write(true).create(true).truncate(true).open(path).at(path)?;
    serde_json::to_writer_pretty(file, value).map_err(|e| Error::format(path, e.to_string()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).at(path)?;
    serde_json::from_str(&text).map_err(|e| Error::format(path, e.to_string()))
}

fn csv_error(path: &Path, e: csv::Error) -> Error {
    if e.is_io_error() {
        if let csv::ErrorKind::Io(io) = e.into_kind() {
            return Error::io(path, io);
        }
        return Error::format(path, "I/O error");
    }
    Error::format(path, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::session::SessionState;
    use crate::train::train_config::TrainConfig;

    fn params() -> ModelParameters {
        let mut p = ModelParameters::zeros(2, 3);
        p.w1.data[1][2] = -0.75;
        p.b2.data[0][0] = 0.125;
        p
    }

    fn metadata() -> TrainingMetadata {
        TrainingMetadata {
            completed_at: Utc::now(),
            outcome: SessionState::Completed,
            epochs_run: 2,
            best_epoch: 2,
            best_loss: Some(0.4),
            final_train_loss: Some(0.5),
            final_val_loss: Some(0.4),
        }
    }

    #[test]
    fn snapshot_names_sort_by_epoch() {
        assert_eq!(snapshot_file_name(7), "weights_history_000007.npz");
        let mut names: Vec<String> = [100, 9, 10, 1].iter().map(|&e| snapshot_file_name(e)).collect();
        names.sort();
        let epochs: Vec<usize> = names.iter().filter_map(|n| parse_snapshot_epoch(n)).collect();
        assert_eq!(epochs, vec![1, 9, 10, 100]);
        assert_eq!(parse_snapshot_epoch(".weights_history_000001.npz.tmp"), None);
    }

    #[test]
    fn full_write_then_open() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        let spec = FeatureSpec::new(["open", "vol"], "close");
        let config = TrainConfig { hidden_size: 3, ..TrainConfig::default() };
        let norm = NormalizationParams {
            feature_mean: vec![1.5, 2.5],
            feature_std: vec![0.1, 1e-8],
            target_min: 10.0,
            target_max: 12.0,
        };

        let mut store = CheckpointStore::create(&dir).unwrap();
        assert!(matches!(CheckpointStore::create(&dir), Err(Error::DirectoryLocked(_))));
        for epoch in 1..=2 {
            store
                .append_epoch(&EpochRecord {
                    epoch,
                    train_loss: 1.0 / epoch as f64,
                    val_loss: (epoch == 2).then_some(0.4),
                    timestamp: Some(Utc::now()),
                })
                .unwrap();
            store.write_snapshot(&WeightSnapshot { epoch, params: params() }).unwrap();
        }
        assert!(!CheckpointStore::validate(&dir).valid);

        let rows = vec![vec![1.0, 2.0, 10.0], vec![2.0, 3.0, 12.0]];
        let meta = metadata();
        store
            .finalize(&FinalArtifacts {
                params: &params(),
                feature_spec: &spec,
                norm: &norm,
                config: &config,
                metadata: &meta,
                training_data: Some(rows.as_slice()),
            })
            .unwrap();
        drop(store);

        let validation = CheckpointStore::validate(&dir);
        assert!(validation.valid, "{validation:?}");
        assert!(validation.optional_missing.is_empty());
        assert!(!dir.join(STAGING_DIR).exists());

        let bundle = CheckpointStore::open(&dir).unwrap();
        assert_eq!(bundle.parameters, params());
        assert_eq!(bundle.normalization, norm);
        assert_eq!(bundle.feature_spec(), spec);
        assert_eq!(bundle.config(), &config);
        assert_eq!(bundle.history.len(), 2);
        assert_eq!(bundle.history[0].val_loss, None);
        assert_eq!(bundle.history[1].val_loss, Some(0.4));
        assert_eq!(bundle.snapshot_refs.iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(bundle.snapshots().count(), 2);
        assert_eq!(bundle.metadata.as_ref().map(|m| m.outcome), Some(SessionState::Completed));
        assert_eq!(bundle.training_data().unwrap(), Some(rows));

        // A finished directory is never reused.
        assert!(matches!(CheckpointStore::create(&dir), Err(Error::Config(_))));
    }

    #[test]
    fn validate_lists_every_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("feature_info.json"), "{}").unwrap();
        let result = CheckpointStore::validate(tmp.path());
        assert!(!result.valid);
        assert_eq!(
            result.missing,
            vec![
                "stock_model.npz",
                "scaler_mean.csv",
                "scaler_std.csv",
                "target_min.csv",
                "target_max.csv",
                "training_losses.csv"
            ]
        );
        assert_eq!(result.optional_missing, vec!["weights_history", "training_metadata.json", "training_data.csv"]);
        match CheckpointStore::open(tmp.path()) {
            Err(Error::InvalidBundle { missing, .. }) => assert_eq!(missing.len(), 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn loss_history_without_timestamps_or_gaps() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("training_losses.csv");
        fs::write(&path, "epoch,train_loss,val_loss\n1,0.5,\n2,0.25,0.3\n").unwrap();
        let h = read_loss_history(&path).unwrap();
        assert_eq!(h[1], EpochRecord { epoch: 2, train_loss: 0.25, val_loss: Some(0.3), timestamp: None });

        fs::write(&path, "epoch,train_loss,val_loss\n1,0.5,\n3,0.25,\n").unwrap();
        assert!(matches!(read_loss_history(&path), Err(Error::Format { .. })));
    }
}
