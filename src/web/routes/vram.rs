use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Body, Response, StatusCode};

use novagen_engine::Core;
use novagen_types::{sys_error, sys_info};

use crate::web::response_helpers::{json_error, json_response, json_success};

pub async fn usage(core: &Core) -> Result<Response<Body>, Infallible> {
    let vram = Arc::clone(&core.vram);
    Ok(match tokio::task::spawn_blocking(move || vram.current_usage()).await {
        Ok(usage) => json_response(StatusCode::OK, &usage),
        Err(e) => {
            sys_error!("[HTTP] VRAM usage probe failed: {}", e);
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read VRAM usage",
            )
        }
    })
}

/// Fire-and-forget cache clear.
pub async fn optimize(core: &Core) -> Result<Response<Body>, Infallible> {
    let vram = Arc::clone(&core.vram);
    tokio::task::spawn_blocking(move || vram.clear_cache());
    sys_info!("[VRAM] Manual cache clear requested");
    Ok(json_success("VRAM optimization triggered"))
}
