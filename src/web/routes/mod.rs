// Request router: one `match (method, path)` over every endpoint

use std::convert::Infallible;

use hyper::{Body, Method, Request, Response, StatusCode};

use novagen_engine::Core;
use novagen_types::{sys_debug, JobId};

use crate::web::request::extract_path_param;
use crate::web::response_helpers::{cors_preflight, json_error};

pub mod gpu;
pub mod health;
pub mod jobs;
pub mod progress;
pub mod queue;
pub mod vram;

pub async fn handle_request(req: Request<Body>, core: Core) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    sys_debug!("[HTTP] {} {}", method, path);

    match (&method, path.as_str()) {
        (&Method::GET, "/health") => health::handle(&core).await,
        (&Method::POST, "/jobs") => jobs::submit(req, &core).await,
        (&Method::GET, "/queue/status") => queue::status(&core).await,
        (&Method::GET, "/gpu/status") => gpu::status(&core).await,
        (&Method::GET, "/vram/usage") => vram::usage(&core).await,
        (&Method::POST, "/vram/optimize") => vram::optimize(&core).await,

        (&Method::GET, path) if path.starts_with("/ws/progress/") => {
            match extract_path_param(path, "/ws/progress/") {
                Some(id) => progress::handle_progress_websocket(req, JobId::from(id), &core).await,
                None => Ok(json_error(StatusCode::BAD_REQUEST, "Missing job id")),
            }
        }

        (&Method::GET, path) if path.starts_with("/jobs/") => {
            let rest = extract_path_param(path, "/jobs/").unwrap_or_default();
            match rest.split_once('/') {
                None if !rest.is_empty() => jobs::status(JobId::from(rest), &core).await,
                Some((id, "result")) => jobs::result(JobId::from(id), &core).await,
                _ => Ok(json_error(StatusCode::NOT_FOUND, "Not found")),
            }
        }

        (&Method::DELETE, path) if path.starts_with("/jobs/") => {
            match extract_path_param(path, "/jobs/") {
                Some(id) if !id.contains('/') => jobs::cancel(JobId::from(id), &core).await,
                _ => Ok(json_error(StatusCode::NOT_FOUND, "Not found")),
            }
        }

        (&Method::OPTIONS, _) => Ok(cors_preflight()),

        _ => Ok(json_error(StatusCode::NOT_FOUND, "Not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novagen_engine::{NoopReclaim, OptimizationThresholds, StaticProbe};
    use novagen_types::DeviceSnapshot;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn core_with(devices: Vec<DeviceSnapshot>) -> Core {
        Core::new(
            Arc::new(StaticProbe::new(devices)),
            Arc::new(NoopReclaim),
            4,
            OptimizationThresholds::default(),
        )
    }

    async fn call(core: &Core, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        let response = handle_request(req, core.clone()).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn submit(core: &Core, body: Value) -> String {
        let (status, json) = call(core, Method::POST, "/jobs", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        json["job_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, json) = call(&core_with(Vec::new()), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_and_lookup() {
        let core = core_with(Vec::new());
        let id = submit(
            &core,
            json!({"type": "generate", "params": {"prompt": "a fox"}, "priority": 2}),
        )
        .await;

        let (status, json) = call(&core, Method::GET, &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], id.as_str());
        assert_eq!(json["type"], "generate");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["priority"], 2);

        let (status, _) = call(&core, Method::GET, &format!("/jobs/{id}/result"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_requests() {
        let core = core_with(Vec::new());
        let (status, json) = call(&core, Method::POST, "/jobs", Some(json!({"type": "video"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "unknown job type 'video'");

        let (status, _) = call(
            &core,
            Method::POST,
            "/jobs",
            Some(json!({"type": "generate", "params": [1, 2]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&core, Method::POST, "/jobs", Some(json!({"params": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel() {
        let core = core_with(Vec::new());
        let id = submit(&core, json!({"type": "upscale"})).await;

        let (status, json) = call(&core, Method::DELETE, &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cancelled"], true);
        assert_eq!(json["status"], "cancelled");

        let (_, json) = call(&core, Method::DELETE, &format!("/jobs/{id}"), None).await;
        assert_eq!(json["cancelled"], false);

        let (_, queue) = call(&core, Method::GET, "/queue/status", None).await;
        assert_eq!(queue["cancelled"], 1);
        assert_eq!(queue["max_concurrent"], 4);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let core = core_with(Vec::new());
        for (method, uri) in [
            (Method::GET, "/jobs/nope"),
            (Method::GET, "/jobs/nope/result"),
            (Method::DELETE, "/jobs/nope"),
            (Method::GET, "/jobs/nope/extra"),
        ] {
            let (status, _) = call(&core, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_gpu_and_vram_without_accelerator() {
        let core = core_with(Vec::new());
        let (_, gpu) = call(&core, Method::GET, "/gpu/status", None).await;
        assert_eq!(gpu, json!({"available": false, "count": 0, "gpus": []}));

        let (_, vram) = call(&core, Method::GET, "/vram/usage", None).await;
        assert_eq!(vram, json!({"available": false}));

        let (status, json) = call(&core, Method::POST, "/vram/optimize", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn test_gpu_status_lists_devices() {
        let core = core_with(vec![DeviceSnapshot {
            id: 0,
            name: "RTX 3090".to_string(),
            total_gb: 24.0,
            allocated_gb: 6.0,
            reserved_gb: 7.0,
        }]);
        let (_, gpu) = call(&core, Method::GET, "/gpu/status", None).await;
        assert_eq!(gpu["available"], true);
        assert_eq!(gpu["gpus"][0]["free_vram_gb"], 18.0);
        assert_eq!(gpu["gpus"][0]["utilization"], 25.0);

        let (_, vram) = call(&core, Method::GET, "/vram/usage", None).await;
        assert_eq!(vram["total_gb"], 24.0);
    }

    #[tokio::test]
    async fn test_progress_requires_upgrade() {
        let core = core_with(Vec::new());
        let (status, _) = call(&core, Method::GET, "/ws/progress/some-job", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_preflight_and_unknown_route() {
        let core = core_with(Vec::new());
        let (status, _) = call(&core, Method::OPTIONS, "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&core, Method::GET, "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
