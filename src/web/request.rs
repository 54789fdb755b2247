// Request parsing utilities for HTTP requests

use hyper::{Body, Request, Response, StatusCode};
use serde::de::DeserializeOwned;

use novagen_types::sys_warn;

use super::response_helpers::json_error;

/// Parse request body as JSON
/// Returns the deserialized value or an error response
pub async fn parse_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Response<Body>> {
    let body_bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            sys_warn!("[HTTP] Failed to read request body: {}", e);
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            ));
        }
    };

    match serde_json::from_slice(&body_bytes) {
        Ok(value) => Ok(value),
        Err(e) => {
            sys_warn!("[HTTP] JSON parsing error: {}", e);
            Err(json_error(
                StatusCode::BAD_REQUEST,
                &format!("Invalid JSON: {e}"),
            ))
        }
    }
}

/// Extract path parameter from URI path
/// Example: extract_path_param("/jobs/abc123", "/jobs/") => Some("abc123")
pub fn extract_path_param<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Payload {
        name: String,
    }

    #[test]
    fn test_extract_path_param() {
        assert_eq!(extract_path_param("/jobs/abc", "/jobs/"), Some("abc"));
        assert_eq!(
            extract_path_param("/jobs/abc/result", "/jobs/"),
            Some("abc/result")
        );
        assert_eq!(extract_path_param("/jobs/", "/jobs/"), None);
        assert_eq!(extract_path_param("/queue/status", "/jobs/"), None);
    }

    #[tokio::test]
    async fn test_parse_json_ok() {
        let req = Request::new(Body::from(r#"{"name":"nova"}"#));
        let payload: Payload = parse_json(req).await.unwrap();
        assert_eq!(payload.name, "nova");
    }

    #[tokio::test]
    async fn test_parse_json_rejects_garbage() {
        let req = Request::new(Body::from("not json"));
        let response = parse_json::<Payload>(req).await.err().unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
