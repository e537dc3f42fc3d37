// handlers/documents.rs - Document lifecycle, change submission and import
//
// Documents are created and destroyed through the hub so the root snapshot
// and the cascade stay consistent with the chain. Every content change,
// including imports, is handed to the document's actor.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::Method,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::Value;

use super::generic::find_or_404;
use super::{Endpoint, GenericOps, ResourceModule};
use crate::api::body::JsonBody;
use crate::api::format::{record_to_api_value, records_to_api_values, ResourceDocument};
use crate::auth::{AccessLevel, AuthContext, Identity};
use crate::database::{Record, RecordId};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schema::{members, DOCUMENT, SNAPSHOT, USER};
use crate::services::HistoryService;
use crate::state::AppState;
use crate::sync::ChangeRequest;
use crate::transcode::ImportRequest;
use crate::upload::read_bounded;

const UPLOAD_FIELD: &str = "file";
const DEFAULT_UPLOAD_MIME: &str = "application/octet-stream";

pub fn module() -> ResourceModule {
    ResourceModule {
        resource: DOCUMENT,
        generic: GenericOps::READ_ONLY,
        endpoints: vec![
            Endpoint::new(Method::POST, "", post(create_document)),
            Endpoint::new(Method::DELETE, "/:id", delete(destroy_document)),
            Endpoint::new(Method::GET, "/:id/snapshots", get(list_snapshots)),
            Endpoint::new(Method::POST, "/:id/snapshots", post(submit_change)),
            Endpoint::new(Method::GET, "/:id/users", get(list_authors)),
            Endpoint::new(
                Method::POST,
                "/:id/import",
                post(import_document).layer(DefaultBodyLimit::disable()),
            ),
        ],
    }
}

/// POST /documents
pub async fn create_document(
    State(state): State<AppState>,
    identity: Identity,
    JsonBody(body): JsonBody,
) -> ApiResult {
    let context = AuthContext::default().with_body(body.clone());
    state.authorize(&identity, "document:create", &context).await?;

    let descriptor = state.descriptor(DOCUMENT)?;
    let document = ResourceDocument::parse(&body, descriptor)?;
    if document.id.is_some() {
        return Err(ApiError::forbidden("Client-generated ids are not supported"));
    }
    if !document.relationships.is_empty() {
        return Err(ApiError::bad_request("Document relationships are managed by the server"));
    }
    if let Some(other) = document.attributes.keys().find(|k| k.as_str() != members::TYPE) {
        return Err(ApiError::bad_request(format!(
            "'{}' cannot be set when creating a document",
            other
        )));
    }
    let doc_type = match document.attributes.get(members::TYPE) {
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(ApiError::bad_request("'type' must be a string")),
        None => return Err(ApiError::bad_request("'type' is required")),
    };

    let created = state
        .hub
        .create_document(&doc_type, identity.user_id.as_deref())
        .await?;
    tracing::info!("Created {} document {}", doc_type, created.id);
    Ok(ApiResponse::created(record_to_api_value(&created, descriptor, None)))
}

/// DELETE /documents/:id
pub async fn destroy_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state
        .authorize(&identity, "document:destroy", &AuthContext::new(&[("id", id.as_str())]))
        .await?;

    find_or_404(&state, state.descriptor(DOCUMENT)?, &id).await?;
    let removed = state.hub.destroy_document(&id).await?;
    tracing::info!("Destroyed document {} ({} records)", id, removed);
    Ok(ApiResponse::no_content())
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: Option<String>,
}

/// GET /documents/:id/snapshots[?since=]
pub async fn list_snapshots(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Vec<Value>> {
    let mut params = vec![("id", id.as_str())];
    if let Some(since) = query.since.as_deref() {
        params.push(("since", since));
    }
    state
        .authorize(&identity, "document/snapshots:index", &AuthContext::new(&params))
        .await?;

    find_or_404(&state, state.descriptor(DOCUMENT)?, &id).await?;
    let snapshots = HistoryService::new(state.store.clone())
        .snapshots_since(&id, query.since.as_deref())
        .await?;
    Ok(ApiResponse::success(records_to_api_values(
        &snapshots,
        state.descriptor(SNAPSHOT)?,
    )))
}

/// GET /documents/:id/users
pub async fn list_authors(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> ApiResult<Vec<Value>> {
    state
        .authorize(&identity, "document/users:index", &AuthContext::new(&[("id", id.as_str())]))
        .await?;

    find_or_404(&state, state.descriptor(DOCUMENT)?, &id).await?;
    let authors = HistoryService::new(state.store.clone()).authors_of(&id).await?;
    Ok(ApiResponse::success(records_to_api_values(&authors, state.descriptor(USER)?)))
}

/// Change submission body, plain or inside `data.attributes`
#[derive(Debug, Deserialize)]
struct ChangeBody {
    #[serde(alias = "changes")]
    changeset: Value,
    parent: RecordId,
    #[serde(default, alias = "user")]
    author: Option<RecordId>,
}

impl ChangeBody {
    fn parse(body: &Value) -> Result<Self, ApiError> {
        let source = body
            .get("data")
            .and_then(|data| data.get("attributes"))
            .unwrap_or(body);
        serde_json::from_value(source.clone())
            .map_err(|e| ApiError::bad_request(format!("Invalid change: {}", e)))
    }
}

/// Author recorded on the snapshot; only root may write on someone else's behalf
fn resolve_author(identity: &Identity, requested: Option<RecordId>) -> Result<Option<RecordId>, ApiError> {
    match requested {
        Some(author) if identity.user_id.as_deref() != Some(author.as_str()) => {
            if identity.access == AccessLevel::Root {
                Ok(Some(author))
            } else {
                Err(ApiError::forbidden("Changes may only be submitted as the authenticated user"))
            }
        }
        Some(author) => Ok(Some(author)),
        None => Ok(identity.user_id.clone()),
    }
}

/// POST /documents/:id/snapshots
pub async fn submit_change(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult {
    let context = AuthContext::new(&[("id", id.as_str())]).with_body(body.clone());
    state.authorize(&identity, "document:change", &context).await?;

    let change = ChangeBody::parse(&body)?;
    find_or_404(&state, state.descriptor(DOCUMENT)?, &id).await?;
    let author = resolve_author(&identity, change.author)?;

    let snapshot = state
        .hub
        .submit(
            &id,
            ChangeRequest {
                changeset: change.changeset,
                parent: change.parent,
                author,
            },
        )
        .await?;
    Ok(ApiResponse::created(record_to_api_value(
        &snapshot,
        state.descriptor(SNAPSHOT)?,
        None,
    )))
}

async fn head_snapshot(state: &AppState, document: &Record) -> Result<Record, ApiError> {
    let head = document.to_one(members::LATEST_SNAPSHOT).ok_or_else(|| {
        tracing::error!("Document {} has no head snapshot", document.id);
        ApiError::internal_server_error("Document history is inconsistent")
    })?;
    state.store.find(SNAPSHOT, head).await?.ok_or_else(|| {
        tracing::error!("Head snapshot {} of document {} is missing", head, document.id);
        ApiError::internal_server_error("Document history is inconsistent")
    })
}

/// POST /documents/:id/import (multipart)
pub async fn import_document(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult {
    state
        .authorize(&identity, "document/import:create", &AuthContext::new(&[("id", id.as_str())]))
        .await?;

    let document = find_or_404(&state, state.descriptor(DOCUMENT)?, &id).await?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let named = field.name() == Some(UPLOAD_FIELD);
        if upload.is_none() || named {
            let mime = field.content_type().unwrap_or(DEFAULT_UPLOAD_MIME).to_string();
            let bytes = read_bounded(Box::pin(field), state.uploads).await?;
            upload = Some((mime, bytes));
        }
        if named {
            break;
        }
    }
    let (mime, bytes) = upload.ok_or_else(|| ApiError::bad_request("No file was uploaded"))?;

    let head = head_snapshot(&state, &document).await?;
    let empty = Value::Null;
    let changeset = state
        .transcoder
        .import(ImportRequest {
            document_id: &id,
            user_id: identity.user_id.as_deref(),
            doc_type: document.field_str(members::TYPE).unwrap_or_default(),
            current: head.field(members::CONTENT).unwrap_or(&empty),
            mime: &mime,
            bytes: &bytes,
        })
        .await?;

    let snapshot = state
        .hub
        .submit(
            &id,
            ChangeRequest {
                changeset,
                parent: head.id,
                author: identity.user_id.clone(),
            },
        )
        .await?;
    tracing::info!("Imported {} bytes of {} into document {}", bytes.len(), mime, id);
    Ok(ApiResponse::created(record_to_api_value(
        &snapshot,
        state.descriptor(SNAPSHOT)?,
        None,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(user: Option<&str>, access: AccessLevel) -> Identity {
        Identity {
            subject: "tester".into(),
            user_id: user.map(str::to_string),
            access,
        }
    }

    #[test]
    fn change_body_accepts_plain_and_enveloped_forms() {
        let plain = ChangeBody::parse(&json!({"changes": ["foo"], "parent": "s1"})).unwrap();
        assert_eq!(plain.changeset, json!(["foo"]));
        assert_eq!(plain.parent, "s1");
        assert_eq!(plain.author, None);

        let enveloped = ChangeBody::parse(&json!({
            "data": {"attributes": {"changeset": [1], "parent": "s2", "user": "u9"}}
        }))
        .unwrap();
        assert_eq!(enveloped.parent, "s2");
        assert_eq!(enveloped.author.as_deref(), Some("u9"));

        let err = ChangeBody::parse(&json!({"changeset": []})).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn author_defaults_to_the_caller() {
        let caller = identity(Some("u1"), AccessLevel::Edit);
        assert_eq!(resolve_author(&caller, None).unwrap().as_deref(), Some("u1"));
        assert_eq!(resolve_author(&caller, Some("u1".into())).unwrap().as_deref(), Some("u1"));
    }

    #[test]
    fn only_root_may_write_as_someone_else() {
        let editor = identity(Some("u1"), AccessLevel::Full);
        assert_eq!(resolve_author(&editor, Some("u2".into())).unwrap_err().status_code(), 403);

        let root = identity(None, AccessLevel::Root);
        assert_eq!(resolve_author(&root, Some("u2".into())).unwrap().as_deref(), Some("u2"));
    }
}
