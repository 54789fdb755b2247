// WebSocket handshake helpers for route handlers

use base64::{engine::general_purpose, Engine as _};
use hyper::{Body, Request, Response, StatusCode};
use sha1::{Digest, Sha1};

use super::response_helpers::{empty_response, json_error};

/// Calculate the WebSocket accept key per RFC 6455
///
/// The accept key is a SHA1 hash of the client's key concatenated with
/// the WebSocket GUID, then base64 encoded.
pub fn calculate_websocket_accept_key(key: &str) -> String {
    const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID);
    let hash = hasher.finalize();
    general_purpose::STANDARD.encode(hash)
}

/// Check if a request wants to upgrade to WebSocket
pub fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    req.headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Extract the WebSocket key from request headers
pub fn get_websocket_key(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get("sec-websocket-key")
        .and_then(|k| k.to_str().ok())
        .map(|s| s.to_string())
}

/// Build a 101 Switching Protocols response for WebSocket upgrade
pub fn build_websocket_upgrade_response(accept_key: &str) -> Response<Body> {
    let mut response = empty_response(StatusCode::SWITCHING_PROTOCOLS);
    let headers = response.headers_mut();
    headers.insert("upgrade", hyper::header::HeaderValue::from_static("websocket"));
    headers.insert("connection", hyper::header::HeaderValue::from_static("upgrade"));
    match hyper::header::HeaderValue::from_str(accept_key) {
        Ok(value) => {
            headers.insert("sec-websocket-accept", value);
            response
        }
        Err(_) => json_error(StatusCode::BAD_REQUEST, "Invalid WebSocket key"),
    }
}
