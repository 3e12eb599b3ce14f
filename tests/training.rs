//! End-to-end training runs against real checkpoint directories.

mod common;

use stock_net::checkpoint::store::{read_loss_history, read_params};
use stock_net::checkpoint::{Artifact, CheckpointStore};
use stock_net::train::{parse_progress_line, ProgressLine};
use stock_net::{
    Error, LineProtocolSink, NullSink, Predictor, ProgressEvent, RunConfig, SessionState, TrainConfig,
    TrainingSession,
};

use common::{feature_spec, prepared, small_config, write_ohlcv_csv};

#[test]
fn events_arrive_once_per_epoch_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let config = TrainConfig { patience: 0, ..small_config(12) };

    let mut events: Vec<ProgressEvent> = Vec::new();
    let mut sink = |e: &ProgressEvent| events.push(e.clone());
    let outcome = TrainingSession::new().run(&config, &prepared(60), tmp.path().join("m"), &mut sink).unwrap();

    assert_eq!(outcome.state, SessionState::Completed);
    assert_eq!(outcome.epochs_run, 12);
    let epochs: Vec<usize> = events.iter().map(|e| e.epoch).collect();
    assert_eq!(epochs, (1..=12).collect::<Vec<_>>());
    assert!(events.iter().all(|e| e.total_epochs == 12));
    assert_eq!(events.last().unwrap().percent_complete, 100.0);
    assert!(events.iter().all(|e| e.val_loss.is_some()));
}

#[test]
fn reruns_with_the_same_seed_are_bit_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let data = prepared(80);
    let config = small_config(15);

    let a = TrainingSession::new().run(&config, &data, tmp.path().join("a"), &mut NullSink).unwrap();
    let b = TrainingSession::new().run(&config, &data, tmp.path().join("b"), &mut NullSink).unwrap();
    assert_eq!(a.parameters, b.parameters);

    let losses = |dir: &str| -> Vec<(f64, Option<f64>)> {
        read_loss_history(&tmp.path().join(dir).join(Artifact::LossHistory.file_name()))
            .unwrap()
            .into_iter()
            .map(|r| (r.train_loss, r.val_loss))
            .collect()
    };
    assert_eq!(losses("a"), losses("b"));

    let other = TrainConfig { seed: 7, ..config };
    let c = TrainingSession::new().run(&other, &data, tmp.path().join("c"), &mut NullSink).unwrap();
    assert_ne!(a.parameters, c.parameters);
}

#[test]
fn cancelling_from_the_sink_saves_the_best_parameters() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("m");
    let mut session = TrainingSession::new();
    let handle = session.cancel_handle();

    let mut seen = 0;
    let mut sink = |e: &ProgressEvent| {
        seen = e.epoch;
        if e.epoch == 3 {
            handle.cancel();
        }
    };
    let outcome = session.run(&small_config(40), &prepared(60), &dir, &mut sink).unwrap();

    assert_eq!(seen, 3);
    assert_eq!(outcome.state, SessionState::Cancelled);
    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(outcome.epochs_run, 3);
    assert!((1..=3).contains(&outcome.best_epoch));

    let bundle = CheckpointStore::open(&dir).unwrap();
    assert_eq!(bundle.parameters, outcome.parameters);
    assert_eq!(bundle.history.len(), 3);
    assert_eq!(bundle.metadata.unwrap().outcome, SessionState::Cancelled);
    assert_eq!(bundle.snapshot_refs.last().unwrap().epoch, 3);
    // The lock is released once the run returns.
    assert!(!dir.join(".training.lock").exists());
}

#[test]
fn early_stopping_keeps_the_best_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    // A huge min_delta means no epoch after the first ever improves.
    let config = TrainConfig { patience: 2, min_delta: 1e9, ..small_config(30) };
    let outcome = TrainingSession::new().run(&config, &prepared(60), tmp.path().join("m"), &mut NullSink).unwrap();

    assert_eq!(outcome.state, SessionState::EarlyStopped);
    assert_eq!(outcome.best_epoch, 1);
    assert_eq!(outcome.epochs_run, 3);
    let bundle = CheckpointStore::open(tmp.path().join("m")).unwrap();
    assert_eq!(bundle.history.len(), 3);
    assert_eq!(bundle.snapshot_refs.iter().map(|s| s.epoch).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn an_early_stop_saves_the_best_epoch_parameters() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("m");
    let config = TrainConfig { patience: 2, min_delta: 1e9, ..small_config(30) };
    let outcome = TrainingSession::new().run(&config, &prepared(60), &dir, &mut NullSink).unwrap();
    assert_eq!((outcome.state, outcome.best_epoch), (SessionState::EarlyStopped, 1));

    let saved = read_params(&Artifact::Model.path_in(&dir)).unwrap();
    let bundle = CheckpointStore::open(&dir).unwrap();
    let best = bundle.snapshot_refs[0].load().unwrap();
    let last = bundle.snapshot_refs[2].load().unwrap();
    assert_eq!((best.epoch, last.epoch), (1, 3));

    let bits = |p: &stock_net::ModelParameters| -> Vec<u64> {
        [&p.w1, &p.b1, &p.w2, &p.b2].iter().flat_map(|m| m.flatten()).map(f64::to_bits).collect()
    };
    assert_eq!(bits(&saved), bits(&best.params));
    assert_ne!(bits(&saved), bits(&last.params));
    assert_eq!(outcome.parameters, saved);
}

#[test]
fn a_locked_directory_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("m");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(".training.lock"), "1").unwrap();

    let mut session = TrainingSession::new();
    let err = session.run(&small_config(3), &prepared(30), &dir, &mut NullSink).unwrap_err();
    assert!(matches!(err, Error::DirectoryLocked(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn stock_example_trains_and_predicts_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let csv = write_ohlcv_csv(&tmp.path().join("prices.csv"), 120);
    let model_dir = tmp.path().join("model");

    let config = RunConfig {
        data: csv.clone(),
        model_dir: model_dir.clone(),
        features: feature_spec(),
        with_indicators: false,
        train: TrainConfig { epochs: 50, patience: 10, batch_size: 16, hidden_size: 4, ..TrainConfig::default() },
        visualization: None,
    };

    let mut session = TrainingSession::new();
    let mut sink = LineProtocolSink::new(Vec::new());
    let outcome = config.train(&mut session, &mut sink).unwrap();
    assert!(matches!(outcome.state, SessionState::Completed | SessionState::EarlyStopped));
    assert!(outcome.epochs_run >= 1 && outcome.epochs_run <= 50);

    // Two protocol lines per epoch, both parseable.
    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<ProgressLine> = text.lines().map(|l| parse_progress_line(l).unwrap()).collect();
    assert_eq!(lines.len(), 2 * outcome.epochs_run);
    assert!(matches!(lines[0], ProgressLine::Loss { epoch: 1, .. }));
    assert!(matches!(lines[1], ProgressLine::Weights { epoch: 1, .. }));

    let report = CheckpointStore::validate(&model_dir);
    assert!(report.valid, "{report:?}");
    assert!(report.optional_missing.is_empty());

    let bundle = CheckpointStore::open(&model_dir).unwrap();
    assert_eq!(bundle.history.len(), outcome.epochs_run);
    assert_eq!(bundle.snapshot_refs.len(), outcome.epochs_run);
    let first = bundle.history[0].train_loss;
    let best = bundle.history.iter().map(|r| r.train_loss).fold(f64::INFINITY, f64::min);
    assert!(best < first);

    let predictor = Predictor::load(&model_dir).unwrap();
    let dataset = stock_net::Dataset::load_csv(&csv).unwrap();
    let predictions = predictor.predict(&dataset).unwrap();
    assert_eq!(predictions.len(), 120);
    assert!(predictions.iter().all(|p| p.predicted.is_finite() && p.actual.is_some()));
    let metrics = predictor.evaluate(&dataset).unwrap();
    assert!(metrics.rmse.is_finite() && metrics.mse >= 0.0);
    assert!((metrics.rmse * metrics.rmse - metrics.mse).abs() < 1e-9);
}

#[test]
fn a_second_run_into_a_finished_directory_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("m");
    TrainingSession::new().run(&small_config(2), &prepared(30), &dir, &mut NullSink).unwrap();

    let mut session = TrainingSession::new();
    let err = session.run(&small_config(2), &prepared(30), &dir, &mut NullSink).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(Artifact::Model.path_in(&dir).is_file());
}
