use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::params::ModelParameters;

/// One line of the loss history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Sample-weighted mean MSE over the training split.
    pub train_loss: f64,
    /// Full-pass MSE over the validation split, if there is one.
    pub val_loss: Option<f64>,
    /// `None` only for histories written without a timestamp column.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parameters captured at the end of `epoch`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSnapshot {
    pub epoch: usize,
    pub params: ModelParameters,
}

/// Emitted once per completed epoch, in epoch order.
///
/// Observers (the line protocol writer, the monitor's event stream) learn
/// about progress only through these events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    /// `epoch / total_epochs * 100`.
    pub percent_complete: f64,
    /// Current values of the two trajectory axes.
    pub coords: (f64, f64),
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn percent(epoch: usize, total_epochs: usize) -> f64 {
        epoch as f64 / total_epochs.max(1) as f64 * 100.0
    }
}
