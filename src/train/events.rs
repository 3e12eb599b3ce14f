//! Progress event sinks and the textual progress line protocol.
//!
//! Each completed epoch produces one `LOSS:` line and one `WEIGHTS:` line:
//!
//! ```text
//! LOSS:12,0.004817
//! WEIGHTS:12,0.153209,-0.871144
//! ```
//!
//! Readers accept only numbers with a decimal point and skip every line they
//! do not recognize.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use log::warn;

use crate::train::epoch_stats::ProgressEvent;

/// Receives one event per completed epoch, synchronously on the training
/// thread. Implementations must not block for long.
pub trait EventSink {
    fn on_epoch_complete(&mut self, event: &ProgressEvent);
}

impl<F> EventSink for F
where
    F: FnMut(&ProgressEvent),
{
    fn on_epoch_complete(&mut self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_epoch_complete(&mut self, _event: &ProgressEvent) {}
}

/// Forwards events into a bounded channel without ever blocking.
///
/// When the buffer is full the event is dropped and counted; a disconnected
/// receiver is ignored so training continues unobserved.
#[derive(Debug)]
pub struct ChannelSink {
    tx: SyncSender<ProgressEvent>,
    dropped: usize,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn bounded(capacity: usize) -> (ChannelSink, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (ChannelSink { tx, dropped: 0 }, rx)
    }

    /// Events lost because the channel was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl EventSink for ChannelSink {
    fn on_epoch_complete(&mut self, event: &ProgressEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!("progress channel full, dropped event for epoch {}", event.epoch);
            }
        }
    }
}

/// Writes the `LOSS:`/`WEIGHTS:` line pair for every event and flushes.
#[derive(Debug)]
pub struct LineProtocolSink<W: Write> {
    writer: W,
    failed: bool,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(writer: W) -> Self {
        LineProtocolSink { writer, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for LineProtocolSink<W> {
    fn on_epoch_complete(&mut self, event: &ProgressEvent) {
        if self.failed {
            return;
        }
        let result = write_progress_lines(&mut self.writer, event).and_then(|_| self.writer.flush());
        if let Err(e) = result {
            // One warning; the stream stays silent afterwards.
            warn!("progress stream closed at epoch {}: {e}", event.epoch);
            self.failed = true;
        }
    }
}

/// Formats the two protocol lines for `event`.
pub fn format_progress_lines(event: &ProgressEvent) -> String {
    format!(
        "LOSS:{},{:.6}\nWEIGHTS:{},{:.6},{:.6}\n",
        event.epoch, event.train_loss, event.epoch, event.coords.0, event.coords.1
    )
}

pub fn write_progress_lines<W: Write>(writer: &mut W, event: &ProgressEvent) -> std::io::Result<()> {
    writer.write_all(format_progress_lines(event).as_bytes())
}

/// A parsed protocol line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    Loss { epoch: usize, loss: f64 },
    Weights { epoch: usize, w1: f64, w2: f64 },
}

/// Parses one protocol line; `None` for anything unrecognized.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix("LOSS:") {
        let (epoch, loss) = rest.split_once(',')?;
        return Some(ProgressLine::Loss { epoch: parse_epoch(epoch)?, loss: parse_decimal(loss)? });
    }
    if let Some(rest) = line.strip_prefix("WEIGHTS:") {
        let mut parts = rest.split(',');
        let epoch = parse_epoch(parts.next()?)?;
        let w1 = parse_decimal(parts.next()?)?;
        let w2 = parse_decimal(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        return Some(ProgressLine::Weights { epoch, w1, w2 });
    }
    None
}

fn parse_epoch(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Accepts exactly `-?\d+\.\d+`.
fn parse_decimal(s: &str) -> Option<f64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int, frac) = digits.split_once('.')?;
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !(all_digits(int) && all_digits(frac)) {
        return None;
    }
    s.parse().ok()
}
