use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::checkpoint::bundle::{FinalArtifacts, TrainingMetadata};
use crate::checkpoint::store::CheckpointStore;
use crate::data::preprocess::PreparedData;
use crate::error::{Error, Result};
use crate::network::network::NetworkModel;
use crate::network::params::ModelParameters;
use crate::optim::adam::Adam;
use crate::train::early_stopping::{EarlyStopping, StoppingDecision};
use crate::train::epoch_stats::{EpochRecord, ProgressEvent, WeightSnapshot};
use crate::train::events::EventSink;
use crate::train::loop_fn::run_one_epoch;
use crate::train::train_config::TrainConfig;

/// Lifecycle of a [`TrainingSession`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Completed,
    EarlyStopped,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::EarlyStopped => "early_stopped",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag shared with other threads.
///
/// The training loop polls it once per epoch boundary, so the epoch in
/// flight always completes first.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub state: SessionState,
    pub epochs_run: usize,
    /// `0` when no epoch completed.
    pub best_epoch: usize,
    pub best_loss: Option<f64>,
    pub final_train_loss: Option<f64>,
    pub final_val_loss: Option<f64>,
    /// The parameters written to `stock_model.npz`.
    pub parameters: ModelParameters,
    pub checkpoint_dir: PathBuf,
}

/// One training run, owned by the caller.
///
/// A session runs at most once: `Idle → Running → {Completed, EarlyStopped,
/// Failed, Cancelled}`.
#[derive(Debug, Default)]
pub struct TrainingSession {
    state: SessionState,
    cancel: CancelHandle,
    initial: Option<ModelParameters>,
}

impl TrainingSession {
    pub fn new() -> TrainingSession {
        TrainingSession::default()
    }

    /// Starts from `params` instead of a seeded random initialization.
    pub fn with_initial_parameters(mut self, params: ModelParameters) -> TrainingSession {
        self.initial = Some(params);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A handle that cancels this session from any thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Trains on `data`, writing checkpoints to `checkpoint_dir` and one
    /// event per epoch to `sink`.
    ///
    /// Configuration, data and shape problems are reported before anything
    /// is written and leave the session `Idle`. A NaN or infinity mid-run
    /// fails the session without writing a final model; the loss history
    /// and snapshots written so far stay on disk.
    pub fn run(
        &mut self,
        config: &TrainConfig,
        data: &PreparedData,
        checkpoint_dir: impl AsRef<Path>,
        sink: &mut dyn EventSink,
    ) -> Result<TrainingOutcome> {
        if self.state != SessionState::Idle {
            return Err(Error::Config(format!("session already ran (state: {})", self.state)));
        }
        let input_size = data.feature_spec.input_size();
        config.validate()?;
        config.validate_axes(input_size)?;
        if data.x_train.rows == 0 {
            return Err(Error::Data("training split is empty".into()));
        }
        if data.x_train.cols != input_size {
            return Err(Error::shape_mismatch(
                "training inputs",
                format!("{input_size} columns"),
                format!("{} columns", data.x_train.cols),
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = match self.initial.take() {
            Some(params) => {
                params.check_shapes(input_size, config.hidden_size)?;
                NetworkModel::from_parameters(params, config.activation)
            }
            None => NetworkModel::new(input_size, config.hidden_size, config.activation, &mut rng),
        };

        let mut store = CheckpointStore::create(checkpoint_dir)?;
        self.state = SessionState::Running;
        info!(
            "training {} -> {} on {} rows ({} validation), {} epochs",
            input_size,
            config.hidden_size,
            data.x_train.rows,
            data.x_val.rows,
            config.epochs
        );

        let result = self.train_epochs(config, data, model, &mut rng, &mut store, sink);
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    fn train_epochs(
        &mut self,
        config: &TrainConfig,
        data: &PreparedData,
        mut model: NetworkModel,
        rng: &mut StdRng,
        store: &mut CheckpointStore,
        sink: &mut dyn EventSink,
    ) -> Result<TrainingOutcome> {
        let initial_params = model.params.clone();
        let mut optimizer = Adam::new(config.optimizer, &model.params);
        let mut early = EarlyStopping::new(config.patience, config.min_delta);
        let [axis1, axis2] = config.trajectory_axes;

        let mut epochs_run = 0;
        let mut last_snapshot = 0;
        let mut last_losses: Option<(f64, Option<f64>)> = None;

        for epoch in 1..=config.epochs {
            if self.cancel.is_cancelled() {
                info!("training cancelled after {epochs_run} epochs");
                self.state = SessionState::Cancelled;
                break;
            }

            let train_loss = run_one_epoch(
                &mut model,
                &mut optimizer,
                &data.x_train,
                &data.y_train,
                config.batch_size,
                config.shuffle,
                rng,
            )
            .map_err(|fault| numerical(epoch, fault.to_string()))?;

            let val_loss = data.has_validation().then(|| model.loss(&data.x_val, &data.y_val));
            if let Some(v) = val_loss.filter(|v| !v.is_finite()) {
                return Err(numerical(epoch, format!("validation loss is {v}")));
            }

            let timestamp = Utc::now();
            store.append_epoch(&EpochRecord { epoch, train_loss, val_loss, timestamp: Some(timestamp) })?;
            epochs_run = epoch;
            last_losses = Some((train_loss, val_loss));

            let decision = early.check(val_loss.unwrap_or(train_loss), epoch, &model.params);
            let stopping = decision == StoppingDecision::Stop;

            if config.snapshot_due(epoch, epoch == config.epochs || stopping) {
                store.write_snapshot(&WeightSnapshot { epoch, params: model.params.clone() })?;
                last_snapshot = epoch;
            }

            let event = ProgressEvent {
                epoch,
                total_epochs: config.epochs,
                train_loss,
                val_loss,
                percent_complete: ProgressEvent::percent(epoch, config.epochs),
                coords: (model.params.coord(axis1)?, model.params.coord(axis2)?),
                timestamp,
            };
            sink.on_epoch_complete(&event);
            debug!("epoch {epoch}: train {train_loss:.6}, val {val_loss:?}");

            if stopping {
                info!(
                    "early stopping at epoch {epoch}; best epoch {} with loss {:.6}",
                    early.best_epoch(),
                    early.best_loss().unwrap_or(f64::NAN)
                );
                self.state = SessionState::EarlyStopped;
                break;
            }
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Completed;
        }

        // The trajectory always ends at the last epoch that ran.
        if epochs_run > 0 && last_snapshot != epochs_run {
            store.write_snapshot(&WeightSnapshot { epoch: epochs_run, params: model.params.clone() })?;
        }

        let best_epoch = early.best_epoch();
        let best_loss = early.best_loss();
        let parameters = match self.state {
            SessionState::Completed => model.params,
            _ => early.into_best_params().unwrap_or(initial_params),
        };
        if self.state == SessionState::Cancelled && epochs_run == 0 {
            warn!("cancelled before the first epoch; saving the initial parameters");
        }

        let metadata = TrainingMetadata {
            completed_at: Utc::now(),
            outcome: self.state,
            epochs_run,
            best_epoch,
            best_loss,
            final_train_loss: last_losses.map(|l| l.0),
            final_val_loss: last_losses.and_then(|l| l.1),
        };
        store.finalize(&FinalArtifacts {
            params: &parameters,
            feature_spec: &data.feature_spec,
            norm: &data.norm,
            config,
            metadata: &metadata,
            training_data: Some(data.raw_rows.as_slice()),
        })?;

        Ok(TrainingOutcome {
            state: self.state,
            epochs_run,
            best_epoch,
            best_loss,
            final_train_loss: metadata.final_train_loss,
            final_val_loss: metadata.final_val_loss,
            parameters,
            checkpoint_dir: store.dir().to_path_buf(),
        })
    }
}

fn numerical(epoch: usize, detail: String) -> Error {
    Error::Numerical { epoch, last_valid_epoch: epoch - 1, detail }
}
