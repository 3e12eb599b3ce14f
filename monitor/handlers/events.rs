use std::time::{Duration, Instant};

use tiny_http::Request;

use crate::state::{lock, SharedState};
use crate::util::sse::{format_event, format_progress_event, write_sse, KEEPALIVE, SSE_HEAD};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// `GET /train/events`
///
/// Replays every event of the current run, then follows new ones as they
/// arrive. When the run has ended and the history is exhausted, a final
/// `done` event carries the status report and the stream closes. A client
/// that disconnects only ends its own stream; training is unaffected.
pub fn handle(request: Request, state: SharedState) {
    let mut writer = request.into_writer();
    if write_sse(&mut writer, SSE_HEAD).is_err() {
        return;
    }

    let mut next = 0;
    let mut last_write = Instant::now();
    loop {
        let (pending, finished) = {
            let st = lock(&state);
            next = resume_from(next, st.history.len());
            (st.history[next..].to_vec(), !st.training.is_running())
        };

        for event in &pending {
            if write_sse(&mut writer, &format_progress_event(event)).is_err() {
                return;
            }
            last_write = Instant::now();
        }
        next += pending.len();

        if finished && pending.is_empty() {
            let report = lock(&state).status_report();
            let data = serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_owned());
            let _ = write_sse(&mut writer, &format_event("done", &data));
            return;
        }

        if last_write.elapsed() >= KEEPALIVE_INTERVAL {
            if write_sse(&mut writer, KEEPALIVE).is_err() {
                return;
            }
            last_write = Instant::now();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Cursor to read from next. A cursor past the end means a new run cleared
/// the history, so its events are streamed from the start.
fn resume_from(next: usize, len: usize) -> usize {
    if next > len {
        0
    } else {
        next
    }
}
