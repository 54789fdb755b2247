// GPU status route. Probing may shell out to nvidia-smi, so it runs on the
// blocking pool.

use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Body, Response, StatusCode};

use novagen_engine::Core;
use novagen_types::sys_error;

use crate::web::response_helpers::{json_error, json_response};

pub async fn status(core: &Core) -> Result<Response<Body>, Infallible> {
    let gpus = Arc::clone(&core.gpus);
    Ok(match tokio::task::spawn_blocking(move || gpus.status()).await {
        Ok(status) => json_response(StatusCode::OK, &status),
        Err(e) => {
            sys_error!("[HTTP] GPU status probe failed: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read GPU status",
            )
        }
    })
}
