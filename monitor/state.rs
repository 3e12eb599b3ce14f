use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use stock_net::checkpoint::SnapshotRef;
use stock_net::{CancelHandle, LossSurface, ProgressEvent, SessionState, SurfaceReconstructor, VisualizationConfig};

/// Lifecycle of the run the monitor is tracking.
pub enum TrainingStatus {
    Idle,
    Running {
        cancel: CancelHandle,
        total_epochs: usize,
    },
    /// The session ended with a bundle on disk.
    Finished {
        state: SessionState,
        epochs_run: usize,
        best_epoch: usize,
        best_loss: Option<f64>,
    },
    Failed {
        reason: String,
    },
    /// The request was refused before training started; no files were written.
    Rejected {
        reason: String,
    },
}

impl TrainingStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, TrainingStatus::Running { .. })
    }
}

/// A computed surface plus what is needed to replay frames over it.
pub struct SurfaceCache {
    pub model_dir: PathBuf,
    pub reconstructor: SurfaceReconstructor,
    pub surface: LossSurface,
    pub snapshots: Vec<SnapshotRef>,
    pub visualization: VisualizationConfig,
}

pub struct MonitorState {
    pub training: TrainingStatus,
    /// Every event of the current run, in epoch order.
    pub history: Vec<ProgressEvent>,
    pub model_dir: Option<PathBuf>,
    pub visualization: VisualizationConfig,
    pub surface: Option<Arc<SurfaceCache>>,
}

impl MonitorState {
    pub fn new() -> Self {
        MonitorState {
            training: TrainingStatus::Idle,
            history: Vec::new(),
            model_dir: None,
            visualization: VisualizationConfig::default(),
            surface: None,
        }
    }

    pub fn status_report(&self) -> StatusReport {
        let (state, total_epochs, outcome, error) = match &self.training {
            TrainingStatus::Idle => (SessionState::Idle, None, None, None),
            TrainingStatus::Running { total_epochs, .. } => (SessionState::Running, Some(*total_epochs), None, None),
            TrainingStatus::Finished { state, epochs_run, best_epoch, best_loss } => (
                *state,
                None,
                Some(OutcomeReport { epochs_run: *epochs_run, best_epoch: *best_epoch, best_loss: *best_loss }),
                None,
            ),
            TrainingStatus::Failed { reason } => (SessionState::Failed, None, None, Some(reason.clone())),
            TrainingStatus::Rejected { reason } => (SessionState::Idle, None, None, Some(reason.clone())),
        };
        StatusReport {
            state,
            total_epochs,
            events_seen: self.history.len(),
            last_event: self.history.last().cloned(),
            model_dir: self.model_dir.clone(),
            outcome,
            rejected: matches!(self.training, TrainingStatus::Rejected { .. }),
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutcomeReport {
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_loss: Option<f64>,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: SessionState,
    pub total_epochs: Option<usize>,
    pub events_seen: usize,
    pub last_event: Option<ProgressEvent>,
    pub model_dir: Option<PathBuf>,
    pub outcome: Option<OutcomeReport>,
    /// Set when the last request never started a run.
    pub rejected: bool,
    pub error: Option<String>,
}

pub type SharedState = Arc<Mutex<MonitorState>>;

/// Locks the state, recovering it if a handler thread panicked.
pub fn lock(state: &SharedState) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
