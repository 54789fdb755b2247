// Job submission, lookup and cancellation

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use novagen_engine::{Core, JobResult};
use novagen_types::{JobId, JobKind};

use crate::web::request::parse_json;
use crate::web::response_helpers::{json_error, json_response};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub priority: i32,
}

pub async fn submit(req: Request<Body>, core: &Core) -> Result<Response<Body>, Infallible> {
    let body: SubmitJobRequest = match parse_json(req).await {
        Ok(body) => body,
        Err(response) => return Ok(response),
    };

    let kind = match body.kind.parse::<JobKind>() {
        Ok(kind) => kind,
        Err(e) => return Ok(json_error(StatusCode::BAD_REQUEST, &e.to_string())),
    };

    let params = match body.params {
        Value::Null => json!({}),
        params @ Value::Object(_) => params,
        _ => {
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                "params must be a JSON object",
            ))
        }
    };

    let job_id = core.queue.submit(kind, params, body.priority);
    Ok(json_response(
        StatusCode::OK,
        &json!({ "job_id": job_id, "status": "queued" }),
    ))
}

pub async fn status(job_id: JobId, core: &Core) -> Result<Response<Body>, Infallible> {
    Ok(match core.queue.status(&job_id) {
        Some(snapshot) => json_response(StatusCode::OK, &snapshot),
        None => json_error(StatusCode::NOT_FOUND, "Job not found"),
    })
}

pub async fn result(job_id: JobId, core: &Core) -> Result<Response<Body>, Infallible> {
    Ok(match core.queue.result(&job_id) {
        Some(JobResult::Ready(result)) => json_response(
            StatusCode::OK,
            &json!({ "job_id": job_id, "result": result }),
        ),
        Some(JobResult::Unavailable(status)) => json_error(
            StatusCode::CONFLICT,
            &format!("Job is {status}, no result available"),
        ),
        None => json_error(StatusCode::NOT_FOUND, "Job not found"),
    })
}

pub async fn cancel(job_id: JobId, core: &Core) -> Result<Response<Body>, Infallible> {
    let Some(before) = core.queue.status(&job_id) else {
        return Ok(json_error(StatusCode::NOT_FOUND, "Job not found"));
    };
    let cancelled = core.queue.cancel(&job_id);
    let status = core
        .queue
        .status(&job_id)
        .map_or(before.status, |snapshot| snapshot.status);
    Ok(json_response(
        StatusCode::OK,
        &json!({ "job_id": job_id, "cancelled": cancelled, "status": status }),
    ))
}
