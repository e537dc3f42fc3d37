use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde_json::Value;

use super::media::ensure_json_content_type;
use crate::error::ApiError;

/// JSON request body, checked for media type (415) before it is parsed (400)
#[derive(Debug, Clone)]
pub struct JsonBody(pub Value);

#[axum::async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        ensure_json_content_type(req.headers())?;

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::from_status(rejection.status(), rejection.body_text()))?;

        if bytes.is_empty() {
            return Err(ApiError::invalid_json("request body is empty"));
        }

        serde_json::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| ApiError::invalid_json(format!("malformed JSON body: {}", e)))
    }
}
