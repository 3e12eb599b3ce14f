use std::io::Read;
use std::thread;

use log::{info, warn};
use tiny_http::Request;

use stock_net::{ChannelSink, RunConfig, SessionState, TrainingOutcome, TrainingSession};

use crate::routes::{error_response, json_response, Reply};
use crate::state::{lock, SharedState, TrainingStatus};

/// Events buffered between the training thread and the history drain.
const EVENT_BUFFER: usize = 1024;

// ---------------------------------------------------------------------------
// GET /status
// ---------------------------------------------------------------------------

pub fn handle_status(state: SharedState) -> Reply {
    let report = lock(&state).status_report();
    json_response(200, &report)
}

// ---------------------------------------------------------------------------
// POST /train/start
// ---------------------------------------------------------------------------

pub fn handle_start(request: &mut Request, state: SharedState) -> Reply {
    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        return error_response(400, &format!("could not read request body: {e}"));
    }
    let config: RunConfig = match serde_json::from_str(&body) {
        Ok(c) => c,
        Err(e) => return error_response(400, &format!("invalid run config: {e}")),
    };
    if let Err(e) = config.train.validate() {
        return error_response(400, &e.to_string());
    }

    let session = TrainingSession::new();
    {
        let mut st = lock(&state);
        if st.training.is_running() {
            return error_response(409, "a training run is already in progress");
        }
        st.training = TrainingStatus::Running {
            cancel: session.cancel_handle(),
            total_epochs: config.train.epochs,
        };
        st.history.clear();
        st.surface = None;
        st.model_dir = Some(config.model_dir.clone());
        st.visualization = config.visualization.clone().unwrap_or_default();
    }

    info!("starting training run into {}", config.model_dir.display());
    let reply = json_response(202, &serde_json::json!({ "state": "running", "model_dir": config.model_dir }));
    thread::spawn(move || run_worker(config, session, state));
    reply
}

fn run_worker(config: RunConfig, mut session: TrainingSession, state: SharedState) {
    let (mut sink, rx) = ChannelSink::bounded(EVENT_BUFFER);

    let drain_state = state.clone();
    let drain = thread::spawn(move || {
        for event in rx {
            lock(&drain_state).history.push(event);
        }
    });

    let result = config.train(&mut session, &mut sink);
    if sink.dropped() > 0 {
        warn!("{} progress events were dropped", sink.dropped());
    }
    // Closing the sender ends the drain once the buffer is empty.
    drop(sink);
    let _ = drain.join();

    lock(&state).training = settle(result, session.state());
}

/// Status after a run returns. A session still `Idle` never started: its
/// config or data was refused before the checkpoint directory was touched.
fn settle(result: stock_net::Result<TrainingOutcome>, session_state: SessionState) -> TrainingStatus {
    match result {
        Ok(outcome) => {
            info!("training {} after {} epochs", outcome.state, outcome.epochs_run);
            TrainingStatus::Finished {
                state: outcome.state,
                epochs_run: outcome.epochs_run,
                best_epoch: outcome.best_epoch,
                best_loss: outcome.best_loss,
            }
        }
        Err(e) if session_state == SessionState::Idle => {
            warn!("training request rejected: {e}");
            TrainingStatus::Rejected { reason: e.to_string() }
        }
        Err(e) => {
            warn!("training failed: {e}");
            TrainingStatus::Failed { reason: e.to_string() }
        }
    }
}

// ---------------------------------------------------------------------------
// POST /train/cancel
// ---------------------------------------------------------------------------

pub fn handle_cancel(state: SharedState) -> Reply {
    let st = lock(&state);
    match &st.training {
        TrainingStatus::Running { cancel, .. } => {
            cancel.cancel();
            info!("cancellation requested");
            json_response(202, &serde_json::json!({ "state": "cancelling" }))
        }
        _ => error_response(409, "no training run in progress"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_before_the_run_starts_are_rejections() {
        let err = stock_net::Error::Config("epochs must be at least 1".into());
        match settle(Err(err), SessionState::Idle) {
            TrainingStatus::Rejected { reason } => assert!(reason.contains("epochs")),
            _ => panic!("expected a rejected run"),
        }
        let err = stock_net::Error::Config("disk full".into());
        assert!(matches!(settle(Err(err), SessionState::Failed), TrainingStatus::Failed { .. }));
    }
}
