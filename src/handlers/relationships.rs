// handlers/relationships.rs - Linkage read/link/unlink handlers per declared relation
//
// To-one relations are replaced wholesale with PATCH. To-many relations only
// accept additive (POST) and subtractive (DELETE) edits.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{delete, get, patch, post, MethodRouter},
};
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;

use super::generic::find_or_404;
use crate::api::body::JsonBody;
use crate::api::format::{linkage_to_api_value, RelationshipData, API_PREFIX};
use crate::api::media::ensure_json_content_type_if_present;
use crate::auth::{AuthContext, Identity};
use crate::database::{Linkage, RecordDraft, RecordId};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::{Relation, ResourceDescriptor};
use crate::state::AppState;

/// Relation bound to its owning resource
#[derive(Clone)]
struct Binding {
    descriptor: Arc<ResourceDescriptor>,
    relation: Arc<Relation>,
}

impl Binding {
    fn new(descriptor: Arc<ResourceDescriptor>, relation: &Relation) -> Self {
        Self {
            descriptor,
            relation: Arc::new(relation.clone()),
        }
    }

    fn context(&self, id: &str) -> AuthContext {
        AuthContext::new(&[("id", id), ("relationship", self.relation.name.as_str())])
    }
}

/// GET /{collection}/:id/relationships/{relation}
pub fn read(descriptor: Arc<ResourceDescriptor>, relation: &Relation) -> MethodRouter<AppState> {
    let binding = Binding::new(descriptor, relation);
    get(
        move |State(state): State<AppState>, identity: Identity, headers: HeaderMap, Path(id): Path<String>| async move {
            ensure_json_content_type_if_present(&headers)?;
            read_linkage(&state, &binding, &identity, &id).await
        },
    )
}

/// PATCH on a to-one relation; to-many relations reject bulk replacement
pub fn replace(descriptor: Arc<ResourceDescriptor>, relation: &Relation) -> MethodRouter<AppState> {
    let binding = Binding::new(descriptor, relation);
    if relation.is_to_many() {
        return patch(
            move |State(state): State<AppState>, identity: Identity, Path(id): Path<String>| async move {
                state
                    .authorize(&identity, &binding.descriptor.capability("write"), &binding.context(&id))
                    .await?;
                Err::<ApiResponse<()>, _>(ApiError::forbidden(format!(
                    "Replacing the to-many relationship '{}' is not supported; use POST or DELETE",
                    binding.relation.name
                )))
            },
        );
    }
    patch(
        move |State(state): State<AppState>, identity: Identity, Path(id): Path<String>, JsonBody(body): JsonBody| async move {
            replace_to_one(&state, &binding, &identity, &id, body).await
        },
    )
}

/// POST on a to-many relation
pub fn add(descriptor: Arc<ResourceDescriptor>, relation: &Relation) -> MethodRouter<AppState> {
    let binding = Binding::new(descriptor, relation);
    post(
        move |State(state): State<AppState>, identity: Identity, Path(id): Path<String>, JsonBody(body): JsonBody| async move {
            add_to_many(&state, &binding, &identity, &id, body).await
        },
    )
}

/// DELETE on a to-many relation
pub fn remove(descriptor: Arc<ResourceDescriptor>, relation: &Relation) -> MethodRouter<AppState> {
    let binding = Binding::new(descriptor, relation);
    delete(
        move |State(state): State<AppState>, identity: Identity, Path(id): Path<String>, JsonBody(body): JsonBody| async move {
            remove_from_many(&state, &binding, &identity, &id, body).await
        },
    )
}

async fn read_linkage(state: &AppState, binding: &Binding, identity: &Identity, id: &str) -> ApiResult {
    state
        .authorize(identity, &binding.descriptor.capability("read"), &binding.context(id))
        .await?;

    let owner = find_or_404(state, &binding.descriptor, id).await?;
    let data = linkage_to_api_value(&binding.relation, owner.relations.get(&binding.relation.name));
    let self_link = format!(
        "{}/{}/{}/relationships/{}",
        API_PREFIX,
        binding.descriptor.collection(),
        id,
        binding.relation.name
    );
    Ok(ApiResponse::success(data).with_links(json!({ "self": self_link })))
}

async fn replace_to_one(
    state: &AppState,
    binding: &Binding,
    identity: &Identity,
    id: &str,
    body: Value,
) -> ApiResult<()> {
    let context = binding.context(id).with_body(body.clone());
    state
        .authorize(identity, &binding.descriptor.capability("write"), &context)
        .await?;

    let target = match RelationshipData::from_body(&body)?.into_linkage(&binding.relation)? {
        Linkage::One(target) => target,
        Linkage::Many(_) => return Err(ApiError::bad_request("expected a single linkage")),
    };

    find_or_404(state, &binding.descriptor, id).await?;
    let draft = RecordDraft::new().to_one(&binding.relation.name, target.as_deref());
    state
        .store
        .update(&binding.descriptor.name, id, draft)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} {} not found", binding.descriptor.name, id)))?;

    tracing::debug!(
        "Set {}/{}.{} to {:?}",
        binding.descriptor.name,
        id,
        binding.relation.name,
        target
    );
    Ok(ApiResponse::no_content())
}

/// Parse a to-many batch body into ids
fn batch_ids(binding: &Binding, body: &Value) -> Result<Vec<RecordId>, ApiError> {
    match RelationshipData::from_body(body)? {
        data @ RelationshipData::ToMany(_) => match data.into_linkage(&binding.relation)? {
            Linkage::Many(ids) => Ok(ids),
            Linkage::One(_) => Err(ApiError::bad_request("expected an array of linkage")),
        },
        RelationshipData::ToOne(_) => Err(ApiError::bad_request(format!(
            "relationship '{}' requires an array of linkage",
            binding.relation.name
        ))),
    }
}

async fn add_to_many(state: &AppState, binding: &Binding, identity: &Identity, id: &str, body: Value) -> ApiResult<()> {
    let context = binding.context(id).with_body(body.clone());
    state
        .authorize(identity, &binding.descriptor.capability("write"), &context)
        .await?;

    let ids = batch_ids(binding, &body)?;
    find_or_404(state, &binding.descriptor, id).await?;

    // Every target must exist before any link is written
    let lookups = ids.iter().map(|target| state.store.find(&binding.relation.resource, target));
    let found = try_join_all(lookups).await?;
    let missing: Vec<&str> = ids
        .iter()
        .zip(&found)
        .filter(|(_, record)| record.is_none())
        .map(|(target, _)| target.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::bad_request(format!(
            "{} not found: {}",
            binding.relation.related_collection(),
            missing.join(", ")
        )));
    }

    // Applied one at a time; an earlier add is not undone if a later one fails
    for target in &ids {
        let linked = state
            .store
            .add_links(&binding.descriptor.name, id, &binding.relation.name, std::slice::from_ref(target))
            .await?;
        if !linked {
            return Err(ApiError::not_found(format!("{} {} not found", binding.descriptor.name, id)));
        }
    }

    tracing::debug!(
        "Linked {} ids to {}/{}.{}",
        ids.len(),
        binding.descriptor.name,
        id,
        binding.relation.name
    );
    Ok(ApiResponse::no_content())
}

async fn remove_from_many(
    state: &AppState,
    binding: &Binding,
    identity: &Identity,
    id: &str,
    body: Value,
) -> ApiResult<()> {
    let context = binding.context(id).with_body(body.clone());
    state
        .authorize(identity, &binding.descriptor.capability("write"), &context)
        .await?;

    let ids = batch_ids(binding, &body)?;
    let owned = state
        .store
        .remove_links(&binding.descriptor.name, id, &binding.relation.name, &ids)
        .await?;
    if !owned {
        return Err(ApiError::not_found(format!("{} {} not found", binding.descriptor.name, id)));
    }
    Ok(ApiResponse::no_content())
}
