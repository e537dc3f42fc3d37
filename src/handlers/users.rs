use axum::{
    extract::{Path, State},
    http::Method,
    routing::get,
};
use serde_json::Value;

use super::generic::find_or_404;
use super::{Endpoint, GenericOps, ResourceModule};
use crate::api::format::records_to_api_values;
use crate::auth::{AuthContext, Identity};
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::{DOCUMENT, SNAPSHOT, USER};
use crate::services::HistoryService;
use crate::state::AppState;

pub fn module() -> ResourceModule {
    ResourceModule {
        resource: USER,
        generic: GenericOps::ALL,
        endpoints: vec![
            Endpoint::new(Method::GET, "/:id/snapshots", get(authored_snapshots)),
            Endpoint::new(Method::GET, "/:id/documents", get(contributed_documents)),
        ],
    }
}

/// GET /users/:id/snapshots
pub async fn authored_snapshots(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Vec<Value>> {
    state
        .authorize(&identity, "user/snapshots:index", &AuthContext::new(&[("id", id.as_str())]))
        .await?;

    find_or_404(&state, state.descriptor(USER)?, &id).await?;
    let snapshots = HistoryService::new(state.store.clone()).snapshots_by_author(&id).await?;
    Ok(ApiResponse::success(records_to_api_values(
        &snapshots,
        state.descriptor(SNAPSHOT)?,
    )))
}

/// GET /users/:id/documents
pub async fn contributed_documents(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Vec<Value>> {
    state
        .authorize(&identity, "user/documents:index", &AuthContext::new(&[("id", id.as_str())]))
        .await?;

    find_or_404(&state, state.descriptor(USER)?, &id).await?;
    let documents = HistoryService::new(state.store.clone()).documents_of(&id).await?;
    Ok(ApiResponse::success(records_to_api_values(&documents, state.descriptor(DOCUMENT)?)))
}
