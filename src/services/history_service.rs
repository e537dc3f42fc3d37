use std::collections::HashSet;
use std::sync::Arc;

use crate::database::{Filter, Record, Store, StoreError};
use crate::error::ApiError;
use crate::schema::{members, DOCUMENT, SNAPSHOT, USER};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Document {0} not found")]
    DocumentNotFound(String),
    #[error("Snapshot {0} not found")]
    SnapshotNotFound(String),
    #[error("Snapshot {snapshot} does not belong to document {document}")]
    ForeignSnapshot { snapshot: String, document: String },
    #[error("Snapshot chain of document {document} is broken at {snapshot}: {reason}")]
    BrokenChain {
        document: String,
        snapshot: String,
        reason: &'static str,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::DocumentNotFound(_) | HistoryError::SnapshotNotFound(_) => ApiError::not_found(err.to_string()),
            HistoryError::ForeignSnapshot { .. } => ApiError::bad_request(err.to_string()),
            HistoryError::BrokenChain { .. } => {
                tracing::error!("{}", err);
                ApiError::internal_server_error("Document history is inconsistent")
            }
            HistoryError::Store(e) => e.into(),
        }
    }
}

/// Read side of the snapshot chains
pub struct HistoryService {
    store: Arc<dyn Store>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Snapshots after `since` up to and including the head, oldest first.
    /// Without `since` the document's whole chain is returned.
    pub async fn snapshots_since(&self, document_id: &str, since: Option<&str>) -> Result<Vec<Record>, HistoryError> {
        match since {
            Some(since) => self.walk_forward(document_id, since).await,
            None => self.full_chain(document_id).await,
        }
    }

    async fn walk_forward(&self, document_id: &str, since: &str) -> Result<Vec<Record>, HistoryError> {
        let start = self
            .store
            .find(SNAPSHOT, since)
            .await?
            .ok_or_else(|| HistoryError::SnapshotNotFound(since.to_string()))?;
        if start.to_one(members::DOCUMENT) != Some(document_id) {
            return Err(HistoryError::ForeignSnapshot {
                snapshot: since.to_string(),
                document: document_id.to_string(),
            });
        }

        let mut visited = HashSet::from([start.id.clone()]);
        let mut current = start.id;
        let mut chain = Vec::new();
        loop {
            let mut children = self
                .store
                .find_linked(SNAPSHOT, members::PARENT, &current)
                .await?;
            let child = match children.len() {
                0 => break,
                1 => children.remove(0),
                _ => return Err(self.broken(document_id, &current, "snapshot has several children")),
            };
            if !visited.insert(child.id.clone()) {
                return Err(self.broken(document_id, &child.id, "parent links form a cycle"));
            }
            current = child.id.clone();
            chain.push(child);
        }
        Ok(chain)
    }

    async fn full_chain(&self, document_id: &str) -> Result<Vec<Record>, HistoryError> {
        let document = self
            .store
            .find(DOCUMENT, document_id)
            .await?
            .ok_or_else(|| HistoryError::DocumentNotFound(document_id.to_string()))?;

        let lookups = document
            .to_many(members::SNAPSHOTS)
            .iter()
            .map(|id| self.store.find(SNAPSHOT, id));
        let found = futures::future::try_join_all(lookups).await?;

        found
            .into_iter()
            .zip(document.to_many(members::SNAPSHOTS))
            .map(|(snapshot, id)| snapshot.ok_or_else(|| self.broken(document_id, id, "linked snapshot is missing")))
            .collect()
    }

    /// Snapshots written by a user, in creation order
    pub async fn snapshots_by_author(&self, user_id: &str) -> Result<Vec<Record>, HistoryError> {
        Ok(self
            .store
            .find_by(SNAPSHOT, &Filter::new().eq(members::AUTHOR, user_id))
            .await?)
    }

    /// Users who authored snapshots of a document, in order of first contribution
    pub async fn authors_of(&self, document_id: &str) -> Result<Vec<Record>, HistoryError> {
        let snapshots = self
            .store
            .find_by(SNAPSHOT, &Filter::new().eq(members::DOCUMENT, document_id))
            .await?;
        self.resolve(USER, distinct_links(&snapshots, members::AUTHOR)).await
    }

    /// Documents a user authored snapshots of, in order of first contribution
    pub async fn documents_of(&self, user_id: &str) -> Result<Vec<Record>, HistoryError> {
        let snapshots = self.snapshots_by_author(user_id).await?;
        self.resolve(DOCUMENT, distinct_links(&snapshots, members::DOCUMENT)).await
    }

    /// Records behind `ids`; ids whose record is gone are skipped
    async fn resolve(&self, resource: &str, ids: Vec<&str>) -> Result<Vec<Record>, HistoryError> {
        let lookups = ids.into_iter().map(|id| self.store.find(resource, id));
        let found = futures::future::try_join_all(lookups).await?;
        Ok(found.into_iter().flatten().collect())
    }

    fn broken(&self, document: &str, snapshot: &str, reason: &'static str) -> HistoryError {
        HistoryError::BrokenChain {
            document: document.to_string(),
            snapshot: snapshot.to_string(),
            reason,
        }
    }
}

fn distinct_links<'a>(records: &'a [Record], relation: &str) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.to_one(relation))
        .filter(|id| seen.insert(*id))
        .collect()
}
