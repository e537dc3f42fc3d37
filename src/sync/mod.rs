//! Document synchronization.
//!
//! [`DocumentHub`] routes every write to a document through that document's
//! single actor. Actors are created lazily on first use. They are evicted once
//! the document is destroyed, and retire on their own after sitting idle.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

mod actor;
pub mod edit;

use actor::{DocumentActor, Job};
pub use edit::{EditType, EditTypes, PlainText, PLAINTEXT};

use crate::database::{Filter, Record, RecordDraft, RecordId, RecordRef, Store, StoreError};
use crate::schema::{members, DOCUMENT, SNAPSHOT};

const MAILBOX_CAPACITY: usize = 64;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown document type '{0}'")]
    UnknownType(String),

    #[error("document {0} does not exist")]
    DocumentMissing(RecordId),

    #[error("snapshot {0} is not part of the document")]
    UnknownParent(RecordId),

    #[error("parent {parent} is stale, head is {head}")]
    StaleParent { parent: RecordId, head: RecordId },

    #[error("invalid changeset: {0}")]
    InvalidChangeset(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("synchronization actor unavailable: {0}")]
    ActorUnavailable(String),
}

/// A change as submitted by a client; never persisted as such
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    pub changeset: Value,
    /// Snapshot the change was based on
    pub parent: RecordId,
    pub author: Option<RecordId>,
}

/// Registered sender of a running actor
pub(crate) struct Mailbox {
    tx: mpsc::Sender<Job>,
    generation: u64,
}

pub(crate) type Mailboxes = Arc<RwLock<HashMap<RecordId, Mailbox>>>;

pub struct DocumentHub {
    store: Arc<dyn Store>,
    types: Arc<EditTypes>,
    actors: Mailboxes,
    generations: AtomicU64,
    idle_timeout: Duration,
}

impl DocumentHub {
    pub fn new(store: Arc<dyn Store>, types: EditTypes) -> Self {
        info!(
            "Document hub ready with edit types: {}",
            types.names().collect::<Vec<_>>().join(", ")
        );
        Self {
            store,
            types: Arc::new(types),
            actors: Arc::new(RwLock::new(HashMap::new())),
            generations: AtomicU64::new(0),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// How long an actor waits for work before retiring
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Create a document together with its root snapshot.
    ///
    /// If any step after the document insert fails, whatever was written is
    /// destroyed again so no document is left without a chain.
    pub async fn create_document(&self, doc_type: &str, author: Option<&str>) -> Result<Record, SyncError> {
        let edit_type = self
            .types
            .get(doc_type)
            .ok_or_else(|| SyncError::UnknownType(doc_type.to_string()))?;

        let document = self
            .store
            .create(DOCUMENT, RecordDraft::new().field(members::TYPE, doc_type))
            .await?;

        match self.create_root(&document.id, edit_type.create(), author).await {
            Ok(document) => {
                debug!("Created {} document {}", doc_type, document.id);
                Ok(document)
            }
            Err(err) => {
                error!("Failed to create root snapshot for document {}: {}", document.id, err);
                self.discard(&document.id).await;
                Err(err)
            }
        }
    }

    async fn create_root(&self, document_id: &str, content: Value, author: Option<&str>) -> Result<Record, SyncError> {
        let root = self
            .store
            .create(
                SNAPSHOT,
                RecordDraft::new()
                    .field(members::CONTENT, content)
                    .to_one(members::DOCUMENT, Some(document_id))
                    .to_one(members::PARENT, None)
                    .to_one(members::AUTHOR, author),
            )
            .await?;

        self.store
            .update(
                DOCUMENT,
                document_id,
                RecordDraft::new()
                    .to_one(members::LATEST_SNAPSHOT, Some(root.id.as_str()))
                    .to_many(members::SNAPSHOTS, vec![root.id.clone()]),
            )
            .await?
            .ok_or_else(|| SyncError::DocumentMissing(document_id.to_string()))
    }

    async fn discard(&self, document_id: &str) {
        let mut targets = vec![RecordRef::new(DOCUMENT, document_id)];
        match self
            .store
            .find_by(SNAPSHOT, &Filter::new().eq(members::DOCUMENT, document_id))
            .await
        {
            Ok(snapshots) => targets.extend(snapshots.iter().map(|s| RecordRef::new(SNAPSHOT, &s.id))),
            Err(err) => error!("Failed to list snapshots of document {}: {}", document_id, err),
        }
        if let Err(err) = self.store.destroy(&targets).await {
            error!("Failed to discard document {}: {}", document_id, err);
        }
    }

    /// Hand a change to the document's actor and wait for the new snapshot
    pub async fn submit(&self, document_id: &str, change: ChangeRequest) -> Result<Record, SyncError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(document_id, Job::Apply { change, reply }).await?;
        response
            .await
            .map_err(|_| SyncError::ActorUnavailable(format!("actor for document {} dropped the change", document_id)))?
    }

    /// Destroy a document and its whole snapshot chain, then retire its actor
    pub async fn destroy_document(&self, document_id: &str) -> Result<u64, SyncError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(document_id, Job::Destroy { reply }).await?;
        let removed = response
            .await
            .map_err(|_| SyncError::ActorUnavailable(format!("actor for document {} dropped the destroy", document_id)))??;
        self.evict(document_id).await;
        Ok(removed)
    }

    // Sends happen while the map is locked, so an idle actor cannot retire
    // between the lookup and the send.
    async fn dispatch(&self, document_id: &str, job: Job) -> Result<(), SyncError> {
        let job = {
            let actors = self.actors.read().await;
            match actors.get(document_id) {
                Some(mailbox) => match mailbox.tx.send(job).await {
                    Ok(()) => return Ok(()),
                    Err(mpsc::error::SendError(job)) => job,
                },
                None => job,
            }
        };

        let mut actors = self.actors.write().await;
        let tx = match actors.get(document_id) {
            Some(mailbox) if !mailbox.tx.is_closed() => mailbox.tx.clone(),
            _ => {
                let mailbox = self.spawn_actor(document_id);
                let tx = mailbox.tx.clone();
                actors.insert(document_id.to_string(), mailbox);
                tx
            }
        };
        tx.send(job)
            .await
            .map_err(|_| SyncError::ActorUnavailable(format!("actor for document {} is not running", document_id)))
    }

    fn spawn_actor(&self, document_id: &str) -> Mailbox {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let tx = DocumentActor {
            document_id: document_id.to_string(),
            store: self.store.clone(),
            types: self.types.clone(),
            mailboxes: self.actors.clone(),
            generation,
            idle_timeout: self.idle_timeout,
        }
        .spawn(MAILBOX_CAPACITY);
        Mailbox { tx, generation }
    }

    /// Drop the actor handle for a document; the actor exits once idle
    pub async fn evict(&self, document_id: &str) -> bool {
        self.actors.write().await.remove(document_id).is_some()
    }

    pub async fn active_actors(&self) -> usize {
        self.actors.read().await.values().filter(|m| !m.tx.is_closed()).count()
    }
}
