use std::convert::Infallible;

use hyper::{Body, Response, StatusCode};

use novagen_engine::Core;

use crate::web::response_helpers::json_response;

pub async fn status(core: &Core) -> Result<Response<Body>, Infallible> {
    Ok(json_response(StatusCode::OK, &core.queue.queue_status()))
}
