/// stock-net monitor
///
/// A small HTTP control surface for one training run at a time: start a run
/// from a JSON run config, follow its progress as a server-sent event stream,
/// cancel it, and fetch loss-surface frames once a model is on disk.
///
/// Run with:
///   RUST_LOG=info cargo run --bin monitor --release [addr]
///
/// Routes:
///   POST /train/start           body: run config JSON
///   POST /train/cancel
///   GET  /train/events          LOSS:/WEIGHTS: lines as SSE
///   GET  /status
///   GET  /surface               surface grid as JSON
///   GET  /surface/trajectory    projected snapshots as JSON
///   GET  /surface/frame/<n>.png

mod handlers;
mod routes;
mod state;
mod util;

use std::process;
use std::sync::{Arc, Mutex};

use log::{error, info};
use tiny_http::Server;

use state::MonitorState;

const DEFAULT_ADDR: &str = "127.0.0.1:7878";

fn main() {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MONITOR_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_owned());

    let server = match Server::http(&addr) {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            process::exit(1);
        }
    };
    info!("monitor listening on http://{addr}");

    let shared_state = Arc::new(Mutex::new(MonitorState::new()));

    // The event stream blocks for the whole run, so every request gets its
    // own thread.
    for request in server.incoming_requests() {
        let state_clone = shared_state.clone();
        std::thread::spawn(move || {
            routes::dispatch(request, state_clone);
        });
    }
}
