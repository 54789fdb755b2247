// Health check route handler

use std::convert::Infallible;
use std::sync::atomic::Ordering;

use hyper::{Body, Response, StatusCode};
use serde_json::json;

use novagen_engine::Core;

use crate::web::response_helpers::json_response;
use crate::web::websocket::ACTIVE_WS_CONNECTIONS;

pub async fn handle(core: &Core) -> Result<Response<Body>, Infallible> {
    let queue = core.queue.queue_status();
    Ok(json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "service": "novagen",
            "queued": queue.queued,
            "running": queue.running,
            "ws_connections": ACTIVE_WS_CONNECTIONS.load(Ordering::Relaxed),
        }),
    ))
}
