// HTTP response helper functions shared by every route handler

use hyper::http::response::Builder;
use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use novagen_types::sys_error;

/// Standard CORS headers
const CORS_ORIGIN: &str = "*";
const CORS_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const CORS_HEADERS: &str = "content-type, authorization";

fn with_cors(builder: Builder) -> Builder {
    builder
        .header("access-control-allow-origin", CORS_ORIGIN)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
}

/// Finish a builder; a rejected header or status degrades to a bare 500.
fn finish(builder: Builder, body: Body) -> Response<Body> {
    builder.body(body).unwrap_or_else(|e| {
        sys_error!("[HTTP] Failed to build response: {}", e);
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Build a JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());
    json_raw(status, json)
}

/// Build a JSON error response: `{"error": message}`
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Build a JSON success response
pub fn json_success(message: &str) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "success": true, "message": message }),
    )
}

/// Build a raw JSON string response
pub fn json_raw(status: StatusCode, json: String) -> Response<Body> {
    let builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    finish(with_cors(builder), Body::from(json))
}

/// Build an empty response with CORS headers
pub fn empty_response(status: StatusCode) -> Response<Body> {
    finish(with_cors(Response::builder().status(status)), Body::empty())
}

/// CORS preflight response
pub fn cors_preflight() -> Response<Body> {
    empty_response(StatusCode::OK)
}
