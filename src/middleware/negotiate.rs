use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::{media::accepts_json, JSONAPI_MEDIA_TYPE};
use crate::error::ApiError;

/// Export endpoints answer in the exported format and negotiate it themselves
pub const EXPORT_SUFFIX: &str = "/export";

/// Reject requests whose `Accept` header excludes JSON:API with 406
pub async fn negotiate(request: Request, next: Next) -> Response {
    if request.uri().path().ends_with(EXPORT_SUFFIX) || accepts_json(request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!(
        "Rejecting {} {}: Accept excludes {}",
        request.method(),
        request.uri().path(),
        JSONAPI_MEDIA_TYPE
    );
    ApiError::not_acceptable(format!("Responses are only available as {}", JSONAPI_MEDIA_TYPE)).into_response()
}
