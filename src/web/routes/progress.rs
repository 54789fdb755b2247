use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Body, Request, Response, StatusCode};

use novagen_engine::Core;
use novagen_types::{sys_error, JobId};

use crate::web::response_helpers::json_error;
use crate::web::websocket::handle_progress_ws;
use crate::web::websocket_utils::{
    build_websocket_upgrade_response, calculate_websocket_accept_key, get_websocket_key,
    is_websocket_upgrade,
};

/// WebSocket upgrade for `/ws/progress/{job_id}`.
///
/// Unknown or finished jobs are accepted too; such a subscriber simply
/// receives no events.
pub async fn handle_progress_websocket(
    req: Request<Body>,
    job_id: JobId,
    core: &Core,
) -> Result<Response<Body>, Infallible> {
    if !is_websocket_upgrade(&req) {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            "WebSocket upgrade required",
        ));
    }
    let Some(key) = get_websocket_key(&req) else {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            "Missing Sec-WebSocket-Key header",
        ));
    };
    let accept_key = calculate_websocket_accept_key(&key);

    let hub = Arc::clone(&core.hub);
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = handle_progress_ws(upgraded, job_id, hub).await {
                    sys_error!("[WS_PROGRESS] Connection error: {}", e);
                }
            }
            Err(e) => sys_error!("[WS_PROGRESS] Upgrade failed: {}", e),
        }
    });

    Ok(build_websocket_upgrade_response(&accept_key))
}
