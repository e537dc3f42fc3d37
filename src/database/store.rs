use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::record::{Created, Filter, Record, RecordDraft, RecordId, RecordRef};

/// Errors from the persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    Invalid(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Persistence collaborator. Records are never cached by callers across requests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create(&self, resource: &str, draft: RecordDraft) -> Result<Record, StoreError>;

    /// Create unless a record with the same values for `key` exists; a key with
    /// any null or missing member never matches.
    async fn create_unique(
        &self,
        resource: &str,
        draft: RecordDraft,
        key: &[String],
    ) -> Result<Created, StoreError>;

    async fn find(&self, resource: &str, id: &str) -> Result<Option<Record>, StoreError>;

    /// Records matching every criterion, in creation order
    async fn find_by(&self, resource: &str, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    /// Records whose to-one `relation` points at `target`, in creation order
    async fn find_linked(&self, resource: &str, relation: &str, target: &str) -> Result<Vec<Record>, StoreError> {
        self.find_by(resource, &Filter::new().eq(relation, target)).await
    }

    /// Partial update; `None` when the record does not exist
    async fn update(
        &self,
        resource: &str,
        id: &str,
        changes: RecordDraft,
    ) -> Result<Option<Record>, StoreError>;

    /// Partial update that keeps `key` unique across the resource; fails with
    /// `Conflict` when the updated key values belong to another record
    async fn update_unique(
        &self,
        resource: &str,
        id: &str,
        changes: RecordDraft,
        key: &[String],
    ) -> Result<Option<Record>, StoreError>;

    /// Append ids to a to-many relation; `false` when the owner does not exist
    async fn add_links(
        &self,
        resource: &str,
        id: &str,
        relation: &str,
        ids: &[RecordId],
    ) -> Result<bool, StoreError>;

    /// Remove ids from a to-many relation; `false` when the owner does not exist
    async fn remove_links(
        &self,
        resource: &str,
        id: &str,
        relation: &str,
        ids: &[RecordId],
    ) -> Result<bool, StoreError>;

    /// Delete all targets atomically; returns the number of records removed
    async fn destroy(&self, targets: &[RecordRef]) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Key values of `fields` for a unique key, `None` if any member is null or absent
pub(crate) fn unique_values(fields: &Map<String, Value>, key: &[String]) -> Option<Filter> {
    let mut filter = Filter::new();
    for name in key {
        match fields.get(name) {
            Some(value) if !value.is_null() => filter = filter.eq(name, value.clone()),
            _ => return None,
        }
    }
    Some(filter)
}

pub(crate) fn unique_conflict(resource: &str, key: &[String]) -> StoreError {
    StoreError::Conflict(format!("another {} already has this {}", resource, key.join(" and ")))
}
