use std::io::Cursor;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, StatusCode};

use crate::handlers;
use crate::state::SharedState;

pub type Reply = Response<Cursor<Vec<u8>>>;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

pub fn bytes_response(status: u16, content_type: &str, bytes: Vec<u8>) -> Reply {
    let len = bytes.len();
    Response::new(
        StatusCode(status),
        header("Content-Type", content_type).into_iter().collect(),
        Cursor::new(bytes),
        Some(len),
        None,
    )
}

pub fn json_response<T: Serialize>(status: u16, body: &T) -> Reply {
    match serde_json::to_vec(body) {
        Ok(bytes) => bytes_response(status, "application/json", bytes),
        Err(e) => error_response(500, &format!("failed to encode response: {e}")),
    }
}

pub fn error_response(status: u16, message: &str) -> Reply {
    let body = serde_json::json!({ "error": message }).to_string();
    bytes_response(status, "application/json", body.into_bytes())
}

pub fn not_found() -> Reply {
    error_response(404, "not found")
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Routes one request. The event stream takes ownership of the request to
/// write directly to the socket; everything else gets a buffered reply.
pub fn dispatch(mut request: Request, state: SharedState) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or("").to_owned();

    if method == Method::Get && path == "/train/events" {
        handlers::events::handle(request, state);
        return;
    }

    let response = match (method, path.as_str()) {
        (Method::Get, "/status") => handlers::train::handle_status(state),
        (Method::Post, "/train/start") => handlers::train::handle_start(&mut request, state),
        (Method::Post, "/train/cancel") => handlers::train::handle_cancel(state),

        (Method::Get, "/surface") => handlers::surface::handle_surface(state),
        (Method::Get, "/surface/trajectory") => handlers::surface::handle_trajectory(state),
        (Method::Get, p) if p.starts_with("/surface/frame/") => {
            match p.strip_prefix("/surface/frame/").and_then(|s| s.strip_suffix(".png")).map(str::parse::<usize>) {
                Some(Ok(index)) => handlers::surface::handle_frame(index, state),
                _ => not_found(),
            }
        }

        _ => not_found(),
    };

    let _ = request.respond(response);
}
