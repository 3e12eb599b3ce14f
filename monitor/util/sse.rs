use std::io::Write;

use stock_net::train::events::format_progress_lines;
use stock_net::ProgressEvent;

/// Response head for an event stream written straight to the socket.
pub const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
                            Content-Type: text/event-stream\r\n\
                            Cache-Control: no-cache\r\n\
                            Connection: keep-alive\r\n\
                            X-Accel-Buffering: no\r\n\
                            \r\n";

/// SSE comment that keeps idle connections open.
pub const KEEPALIVE: &str = ": ping\n\n";

/// One `progress` event whose data lines are the `LOSS:` and `WEIGHTS:`
/// protocol lines for `event`.
pub fn format_progress_event(event: &ProgressEvent) -> String {
    let mut msg = String::from("event: progress\n");
    for line in format_progress_lines(event).lines() {
        msg.push_str("data: ");
        msg.push_str(line);
        msg.push('\n');
    }
    msg.push('\n');
    msg
}

/// A named event with a single data line.
pub fn format_event(name: &str, data: &str) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

/// Writes and flushes one message.
pub fn write_sse<W: Write>(writer: &mut W, msg: &str) -> std::io::Result<()> {
    writer.write_all(msg.as_bytes())?;
    writer.flush()
}
