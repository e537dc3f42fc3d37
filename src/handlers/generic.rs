// handlers/generic.rs - CRUD handlers synthesized per resource descriptor

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, patch, post, MethodRouter},
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::body::JsonBody;
use crate::api::format::{fieldsets_from_query, record_to_api_value, validate_fieldset, ResourceDocument};
use crate::api::media::ensure_json_content_type_if_present;
use crate::auth::{AuthContext, Identity};
use crate::database::{Created, Record, RecordRef};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::ResourceDescriptor;
use crate::state::AppState;

/// POST /{collection}
pub fn create(descriptor: Arc<ResourceDescriptor>) -> MethodRouter<AppState> {
    post(
        move |State(state): State<AppState>, identity: Identity, JsonBody(body): JsonBody| async move {
            create_record(&state, &descriptor, &identity, body).await
        },
    )
}

/// GET /{collection}/:id
pub fn read(descriptor: Arc<ResourceDescriptor>) -> MethodRouter<AppState> {
    get(
        move |State(state): State<AppState>,
              identity: Identity,
              headers: HeaderMap,
              Path(id): Path<String>,
              Query(query): Query<HashMap<String, String>>| async move {
            ensure_json_content_type_if_present(&headers)?;
            read_record(&state, &descriptor, &identity, &id, &query).await
        },
    )
}

/// PATCH /{collection}/:id
pub fn update(descriptor: Arc<ResourceDescriptor>) -> MethodRouter<AppState> {
    patch(
        move |State(state): State<AppState>, identity: Identity, Path(id): Path<String>, JsonBody(body): JsonBody| async move {
            update_record(&state, &descriptor, &identity, &id, body).await
        },
    )
}

/// DELETE /{collection}/:id
pub fn destroy(descriptor: Arc<ResourceDescriptor>) -> MethodRouter<AppState> {
    delete(
        move |State(state): State<AppState>, identity: Identity, headers: HeaderMap, Path(id): Path<String>| async move {
            ensure_json_content_type_if_present(&headers)?;
            destroy_record(&state, &descriptor, &identity, &id).await
        },
    )
}

/// Fetch a record or fail with 404
pub async fn find_or_404(state: &AppState, descriptor: &ResourceDescriptor, id: &str) -> Result<Record, ApiError> {
    state
        .store
        .find(&descriptor.name, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} {} not found", descriptor.name, id)))
}

async fn create_record(
    state: &AppState,
    descriptor: &ResourceDescriptor,
    identity: &Identity,
    body: Value,
) -> ApiResult {
    let context = AuthContext::default().with_body(body.clone());
    state.authorize(identity, &descriptor.capability("create"), &context).await?;

    let document = ResourceDocument::parse(&body, descriptor)?;
    if document.id.is_some() {
        return Err(ApiError::forbidden("Client-generated ids are not supported"));
    }
    let draft = document.into_draft(descriptor)?;

    let created = match &descriptor.unique {
        Some(key) => state.store.create_unique(&descriptor.name, draft, key).await?,
        None => Created::New(state.store.create(&descriptor.name, draft).await?),
    };

    let data = record_to_api_value(created.record(), descriptor, None);
    if created.is_new() {
        tracing::debug!("Created {} {}", descriptor.name, created.record().id);
        Ok(ApiResponse::created(data))
    } else {
        tracing::debug!("Returning existing {} {}", descriptor.name, created.record().id);
        Ok(ApiResponse::success(data))
    }
}

async fn read_record(
    state: &AppState,
    descriptor: &ResourceDescriptor,
    identity: &Identity,
    id: &str,
    query: &HashMap<String, String>,
) -> ApiResult {
    state
        .authorize(identity, &descriptor.capability("read"), &AuthContext::new(&[("id", id)]))
        .await?;

    let fieldset = fieldsets_from_query(query).remove(&descriptor.collection());
    if let Some(fields) = &fieldset {
        validate_fieldset(descriptor, fields)?;
    }

    let record = find_or_404(state, descriptor, id).await?;
    Ok(ApiResponse::success(record_to_api_value(&record, descriptor, fieldset.as_deref())))
}

async fn update_record(
    state: &AppState,
    descriptor: &ResourceDescriptor,
    identity: &Identity,
    id: &str,
    body: Value,
) -> ApiResult {
    let context = AuthContext::new(&[("id", id)]).with_body(body.clone());
    state.authorize(identity, &descriptor.capability("write"), &context).await?;

    let document = ResourceDocument::parse(&body, descriptor)?;
    match document.id.as_deref() {
        Some(body_id) if body_id != id => {
            return Err(ApiError::conflict(format!(
                "Body id '{}' does not match path id '{}'",
                body_id, id
            )))
        }
        None if document.enveloped => return Err(ApiError::bad_request("'data.id' is required")),
        _ => {}
    }
    let draft = document.into_draft(descriptor)?;

    find_or_404(state, descriptor, id).await?;
    let updated = match &descriptor.unique {
        Some(key) => state.store.update_unique(&descriptor.name, id, draft, key).await?,
        None => state.store.update(&descriptor.name, id, draft).await?,
    };
    updated.ok_or_else(|| ApiError::not_found(format!("{} {} not found", descriptor.name, id)))?;

    let record = find_or_404(state, descriptor, id).await?;
    Ok(ApiResponse::success(record_to_api_value(&record, descriptor, None)))
}

async fn destroy_record(
    state: &AppState,
    descriptor: &ResourceDescriptor,
    identity: &Identity,
    id: &str,
) -> ApiResult<()> {
    state
        .authorize(identity, &descriptor.capability("destroy"), &AuthContext::new(&[("id", id)]))
        .await?;

    find_or_404(state, descriptor, id).await?;
    state.store.destroy(&[RecordRef::new(&descriptor.name, id)]).await?;
    tracing::debug!("Destroyed {} {}", descriptor.name, id);
    Ok(ApiResponse::no_content())
}
