use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the training engine, checkpoint store and surface
/// reconstructor can report.
///
/// `Config` and `Data` are raised before any state is mutated. `Numerical`
/// aborts a run and carries the last epoch that completed cleanly.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid hyperparameters or run options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The dataset cannot be used for training.
    #[error("unusable dataset: {0}")]
    Data(String),

    /// NaN or infinity appeared while training.
    #[error("numerical error at epoch {epoch} ({detail}); last valid epoch: {last_valid_epoch}")]
    Numerical {
        epoch: usize,
        last_valid_epoch: usize,
        detail: String,
    },

    /// Parameter, gradient or checkpoint shapes disagree.
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: String,
        expected: String,
        got: String,
    },

    /// Reading or writing a file failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file exists but its contents could not be decoded.
    #[error("malformed file {}: {detail}", path.display())]
    Format { path: PathBuf, detail: String },

    /// A weight coordinate does not exist in the parameter tensors.
    #[error("weight coordinate {coord} is out of range for shape {shape}")]
    Coordinate { coord: String, shape: String },

    /// A checkpoint directory is missing required artifacts.
    #[error("checkpoint bundle at {} is incomplete, missing: {}", path.display(), missing.join(", "))]
    InvalidBundle { path: PathBuf, missing: Vec<String> },

    /// Another training run holds the checkpoint directory.
    #[error("checkpoint directory {} is locked by another training run", .0.display())]
    DirectoryLocked(PathBuf),
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn format(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        Error::Format { path: path.as_ref().to_path_buf(), detail: detail.into() }
    }

    pub fn shape_mismatch(
        what: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Error::ShapeMismatch { what: what.into(), expected: expected.into(), got: got.into() }
    }
}

/// Attaches a path to `std::io::Result` values.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
