//! Patience-based early stopping that remembers the best parameters seen.
//!
//! An epoch improves only when `loss < best - min_delta`; a loss equal to the
//! best so far counts as no improvement.

use crate::network::params::ModelParameters;

/// Outcome of feeding one epoch's monitored loss to [`EarlyStopping`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoppingDecision {
    /// New best loss; its parameters are now retained.
    NewBest,
    /// No improvement, patience not yet exhausted.
    NoImprovement { count: usize, remaining: usize },
    /// `patience` consecutive epochs without improvement.
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// `0` never stops.
    patience: usize,
    min_delta: f64,
    best_loss: f64,
    best_epoch: usize,
    best_params: Option<ModelParameters>,
    counter: usize,
    stopped: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        EarlyStopping {
            patience,
            min_delta,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            best_params: None,
            counter: 0,
            stopped: false,
        }
    }

    /// Records `loss` for `epoch` and the parameters that produced it.
    pub fn check(&mut self, loss: f64, epoch: usize, params: &ModelParameters) -> StoppingDecision {
        if self.stopped {
            return StoppingDecision::Stop;
        }

        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.best_epoch = epoch;
            self.best_params = Some(params.clone());
            self.counter = 0;
            return StoppingDecision::NewBest;
        }

        self.counter += 1;
        if self.patience > 0 && self.counter >= self.patience {
            self.stopped = true;
            StoppingDecision::Stop
        } else {
            StoppingDecision::NoImprovement {
                count: self.counter,
                remaining: self.patience.saturating_sub(self.counter),
            }
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stopped
    }

    /// Epoch of the best loss, `0` before any epoch was recorded.
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// `None` before any epoch was recorded.
    pub fn best_loss(&self) -> Option<f64> {
        self.best_params.as_ref().map(|_| self.best_loss)
    }

    pub fn best_params(&self) -> Option<&ModelParameters> {
        self.best_params.as_ref()
    }

    pub fn into_best_params(self) -> Option<ModelParameters> {
        self.best_params
    }
}
