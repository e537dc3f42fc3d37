use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use super::generic::find_or_404;
use super::{Endpoint, GenericOps, ResourceModule};
use crate::api::media;
use crate::auth::{AuthContext, Identity};
use crate::error::ApiError;
use crate::schema::{members, DOCUMENT, SNAPSHOT};
use crate::state::AppState;

pub fn module() -> ResourceModule {
    ResourceModule {
        resource: SNAPSHOT,
        generic: GenericOps::READ_ONLY,
        endpoints: vec![Endpoint::new(Method::GET, "/:id/export", get(export_snapshot))],
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(rename = "type")]
    pub format: Option<String>,
}

/// GET /snapshots/:id/export[?type=]
///
/// Responds with the transcoded bytes rather than a JSON:API document, so the
/// `Accept` check happens here once the output media type is known.
pub async fn export_snapshot(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    state
        .authorize(&identity, "snapshot/export:read", &AuthContext::new(&[("id", id.as_str())]))
        .await?;

    let snapshot = find_or_404(&state, state.descriptor(SNAPSHOT)?, &id).await?;
    let document_id = snapshot.to_one(members::DOCUMENT).ok_or_else(|| {
        tracing::error!("Snapshot {} has no owning document", id);
        ApiError::internal_server_error("Document history is inconsistent")
    })?;
    let document = find_or_404(&state, state.descriptor(DOCUMENT)?, document_id).await?;

    let content = snapshot.field(members::CONTENT).cloned().unwrap_or_default();
    let exported = state
        .transcoder
        .export(
            document.field_str(members::TYPE).unwrap_or_default(),
            &content,
            query.format.as_deref(),
        )
        .await?;

    if !media::accepts(&headers, &exported.mime) {
        return Err(ApiError::not_acceptable(format!(
            "Export produces {}, which the Accept header does not allow",
            exported.mime
        )));
    }

    let content_type = HeaderValue::from_str(&exported.mime).map_err(|_| {
        tracing::error!("Transcoder produced an invalid media type: {}", exported.mime);
        ApiError::internal_server_error("Export failed")
    })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        Body::from(exported.bytes),
    )
        .into_response())
}
