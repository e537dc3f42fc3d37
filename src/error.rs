// HTTP API Error Types
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::api::format::JSONAPI_MEDIA_TYPE;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),
    PayloadTooLarge(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 405 Method Not Allowed
    MethodNotAllowed(String),

    // 406 Not Acceptable
    NotAcceptable(String),

    // 409 Conflict
    Conflict(String),

    // 415 Unsupported Media Type
    UnsupportedMediaType(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::PayloadTooLarge(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::NotAcceptable(_) => 406,
            ApiError::Conflict(_) => 409,
            ApiError::UnsupportedMediaType(_) => 415,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::MethodNotAllowed(msg)
            | ApiError::NotAcceptable(msg)
            | ApiError::Conflict(msg)
            | ApiError::UnsupportedMediaType(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            ApiError::NotAcceptable(_) => "NOT_ACCEPTABLE",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON:API error document
    pub fn to_json(&self) -> Value {
        let status = self.status();
        json!({
            "errors": [{
                "status": status.as_u16().to_string(),
                "code": self.error_code(),
                "title": status.canonical_reason().unwrap_or("Error"),
                "detail": self.message(),
            }]
        })
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Map a bare status code (framework rejections, fallbacks) onto the taxonomy
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            405 => ApiError::MethodNotAllowed(message),
            406 => ApiError::NotAcceptable(message),
            409 => ApiError::Conflict(message),
            413 => ApiError::PayloadTooLarge(message),
            415 => ApiError::UnsupportedMediaType(message),
            503 => ApiError::ServiceUnavailable(message),
            400..=499 => ApiError::BadRequest(message),
            _ => ApiError::InternalServerError(message),
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::PayloadTooLarge(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        ApiError::NotAcceptable(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        ApiError::UnsupportedMediaType(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert collaborator error types to ApiError
impl From<crate::database::StoreError> for ApiError {
    fn from(err: crate::database::StoreError) -> Self {
        use crate::database::StoreError;
        match err {
            StoreError::NotFound(msg) => ApiError::not_found(msg),
            StoreError::Invalid(msg) => ApiError::bad_request(msg),
            StoreError::Conflict(msg) => ApiError::conflict(msg),
            StoreError::Connection(msg) => {
                tracing::error!("Storage connection error: {}", msg);
                ApiError::service_unavailable("Storage temporarily unavailable")
            }
            StoreError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Storage error occurred")
            }
            StoreError::Corrupt(msg) => {
                tracing::error!("Corrupt stored record: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<crate::sync::SyncError> for ApiError {
    fn from(err: crate::sync::SyncError) -> Self {
        use crate::sync::SyncError;
        match err {
            SyncError::UnknownType(name) => {
                ApiError::bad_request(format!("Document type '{}' is not available", name))
            }
            SyncError::DocumentMissing(id) => ApiError::not_found(format!("Document {} not found", id)),
            SyncError::UnknownParent(id) => {
                ApiError::bad_request(format!("Snapshot {} is not part of this document", id))
            }
            SyncError::StaleParent { parent, head } => ApiError::conflict(format!(
                "Change is based on snapshot {} but the document head is {}",
                parent, head
            )),
            SyncError::InvalidChangeset(msg) => ApiError::bad_request(msg),
            SyncError::Store(e) => e.into(),
            SyncError::ActorUnavailable(msg) => {
                tracing::error!("Synchronization actor failure: {}", msg);
                ApiError::internal_server_error("Document synchronization failed")
            }
        }
    }
}

impl From<crate::transcode::TranscodeError> for ApiError {
    fn from(err: crate::transcode::TranscodeError) -> Self {
        use crate::transcode::TranscodeError;
        match err {
            TranscodeError::UnsupportedFormat(msg) | TranscodeError::Malformed(msg) => {
                ApiError::bad_request(msg)
            }
        }
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(err: crate::auth::AuthError) -> Self {
        tracing::error!("Auth collaborator error: {}", err);
        ApiError::internal_server_error("Authorization check failed")
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status(), Json(self.to_json())).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSONAPI_MEDIA_TYPE),
        );
        response
    }
}
