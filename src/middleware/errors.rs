use axum::{
    body::to_bytes,
    extract::Request,
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;

use crate::api::JSONAPI_MEDIA_TYPE;
use crate::error::ApiError;

const MAX_ERROR_BODY: usize = 16 * 1024;

fn is_structured(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(JSONAPI_MEDIA_TYPE))
}

fn default_message(status: StatusCode, method: &Method, path: &str) -> String {
    match status {
        StatusCode::NOT_FOUND => format!("No route for {} {}", method, path),
        StatusCode::METHOD_NOT_ALLOWED => format!("{} is not allowed on {}", method, path),
        _ => status.canonical_reason().unwrap_or("Error").to_string(),
    }
}

/// Rewrite every error response that is not already a JSON:API error
/// document (framework rejections, 405s, body-limit errors) into one
pub async fn normalize_errors(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || is_structured(response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let message = if status.is_server_error() {
        tracing::error!("Unstructured {} from {} {}", status, method, path);
        "Internal server error".to_string()
    } else {
        let text = to_bytes(body, MAX_ERROR_BODY)
            .await
            .map(|b| String::from_utf8_lossy(&b).trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            default_message(status, &method, &path)
        } else {
            text
        }
    };

    let mut normalized = ApiError::from_status(status, message).into_response();
    if let Some(allow) = parts.headers.get(header::ALLOW) {
        normalized.headers_mut().insert(header::ALLOW, allow.clone());
    }
    normalized
}

/// Panic hook for `CatchPanicLayer`: log and answer 500
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!("Handler panicked: {}", detail);
    ApiError::internal_server_error("An unexpected error occurred").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .layer(from_fn(normalize_errors))
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn plain_text_rejections_become_error_documents() {
        let app = Router::new().route("/teapot", get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }));
        let (status, body) = call(app, "GET", "/teapot").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["detail"], "short and stout");
    }

    #[tokio::test]
    async fn empty_405_gets_a_message() {
        let app = Router::new().route("/only-get", get(|| async { "ok" }));
        let (status, body) = call(app, "DELETE", "/only-get").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["errors"][0]["detail"], "DELETE is not allowed on /only-get");
    }

    #[tokio::test]
    async fn structured_errors_pass_through() {
        let app = Router::new().route("/gone", get(|| async { ApiError::not_found("user 7 not found") }));
        let (status, body) = call(app, "GET", "/gone").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["detail"], "user 7 not found");
    }

    #[test]
    fn panics_render_as_500() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(is_structured(response.headers()));
    }
}
