use std::env;
use std::io;
use std::path::Path;
use std::process;

use log::{error, info};

use stock_net::checkpoint::store::CheckpointStore;
use stock_net::pipeline::{render_animation, RunConfig};
use stock_net::predict::{write_predictions_csv, Predictor};
use stock_net::{Dataset, LineProtocolSink, Result, TrainingSession, VisualizationConfig};

const USAGE: &str = "Usage:
  stock-net train <run.json>
  stock-net predict <model_dir> <data.csv> [predictions.csv]
  stock-net visualize <model_dir> [visualization.json]
  stock-net validate <model_dir>";

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("{USAGE}");
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "train" => train(Path::new(&args[2])),
        "predict" if args.len() >= 4 => predict(Path::new(&args[2]), Path::new(&args[3]), args.get(4).map(Path::new)),
        "visualize" => visualize(Path::new(&args[2]), args.get(3).map(Path::new)),
        "validate" => validate(Path::new(&args[2])),
        _ => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Trains and streams `LOSS:` / `WEIGHTS:` lines on stdout.
fn train(config_path: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    let mut session = TrainingSession::new();
    let mut sink = LineProtocolSink::new(io::stdout());
    let outcome = config.train(&mut session, &mut sink)?;
    info!(
        "training {} after {} epochs (best epoch {}, best loss {:?})",
        outcome.state, outcome.epochs_run, outcome.best_epoch, outcome.best_loss
    );

    if let Some(vis) = &config.visualization {
        render_animation(&config.model_dir, vis)?;
    }
    Ok(())
}

fn predict(model_dir: &Path, data: &Path, out: Option<&Path>) -> Result<()> {
    let predictor = Predictor::load(model_dir)?;
    let dataset = Dataset::load_csv(data)?;
    let predictions = predictor.predict(&dataset)?;

    if let Ok(metrics) = predictor.evaluate(&dataset) {
        println!("MSE:  {:.6}", metrics.mse);
        println!("RMSE: {:.6}", metrics.rmse);
        println!("MAE:  {:.6}", metrics.mae);
        println!("R2:   {:.6}", metrics.r2);
        println!("MAPE: {:.2}%", metrics.mape);
    }
    match out {
        Some(path) => write_predictions_csv(path, &predictions)?,
        None => {
            for p in &predictions {
                println!("{},{}", p.row, p.predicted);
            }
        }
    }
    Ok(())
}

fn visualize(model_dir: &Path, vis_path: Option<&Path>) -> Result<()> {
    let vis = match vis_path {
        Some(path) => VisualizationConfig::load(path)?,
        None => VisualizationConfig::default(),
    };
    let frames = render_animation(model_dir, &vis)?;
    println!("{} frames written to {}", frames.len(), vis.frames_dir(model_dir).display());
    Ok(())
}

fn validate(model_dir: &Path) -> Result<()> {
    let report = CheckpointStore::validate(model_dir);
    for name in &report.missing {
        println!("missing: {name}");
    }
    for name in &report.optional_missing {
        println!("missing (optional): {name}");
    }
    println!("{}", if report.valid { "valid" } else { "invalid" });
    if !report.valid {
        process::exit(2);
    }
    Ok(())
}
