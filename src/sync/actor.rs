//! Per-document actor.
//!
//! Each actor owns the write path of exactly one document. Jobs arrive over a
//! bounded mailbox and are processed one at a time, so two changes to the same
//! document can never interleave their read-head / append / move-head steps.
//! Destroying the document is a job too, which keeps the cascade ordered with
//! respect to in-flight edits.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::edit::EditTypes;
use super::{ChangeRequest, Mailboxes, SyncError};
use crate::database::{Filter, Record, RecordDraft, RecordId, RecordRef, Store, StoreError};
use crate::schema::{members, DOCUMENT, SNAPSHOT};

pub(crate) enum Job {
    Apply {
        change: ChangeRequest,
        reply: oneshot::Sender<Result<Record, SyncError>>,
    },
    Destroy {
        reply: oneshot::Sender<Result<u64, SyncError>>,
    },
}

impl Job {
    fn reject(self, err: SyncError) {
        match self {
            Job::Apply { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Job::Destroy { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

enum Retirement {
    Retired,
    /// A job landed right at the deadline
    Pending(Job),
    /// A dispatcher holds the registry; try again after another idle period
    Contended,
}

pub(crate) struct DocumentActor {
    pub(crate) document_id: RecordId,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) types: Arc<EditTypes>,
    /// The hub's registry, so an idle actor can deregister itself
    pub(crate) mailboxes: Mailboxes,
    pub(crate) generation: u64,
    pub(crate) idle_timeout: Duration,
}

impl DocumentActor {
    pub(crate) fn spawn(self, capacity: usize) -> mpsc::Sender<Job> {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(self, mut rx: mpsc::Receiver<Job>) {
        debug!("Document actor {} started", self.document_id);

        loop {
            let job = match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => match self.try_retire(&mut rx) {
                    Retirement::Retired => {
                        debug!("Document actor {} retired after {:?} idle", self.document_id, self.idle_timeout);
                        return;
                    }
                    Retirement::Pending(job) => job,
                    Retirement::Contended => continue,
                },
            };

            let finished = match job {
                Job::Apply { change, reply } => {
                    let result = self.apply(change).await;
                    let gone = matches!(result, Err(SyncError::DocumentMissing(_)));
                    if let Err(err) = &result {
                        warn!("Rejected change to document {}: {}", self.document_id, err);
                    }
                    let _ = reply.send(result);
                    gone
                }
                Job::Destroy { reply } => {
                    let result = self.destroy().await;
                    let done = result.is_ok();
                    let _ = reply.send(result);
                    done
                }
            };
            if finished {
                break;
            }
        }

        // Jobs queued behind a destroy target a document that no longer exists
        rx.close();
        while let Some(job) = rx.recv().await {
            job.reject(SyncError::DocumentMissing(self.document_id.clone()));
        }
        debug!("Document actor {} stopped", self.document_id);
    }

    fn try_retire(&self, rx: &mut mpsc::Receiver<Job>) -> Retirement {
        let Ok(mut mailboxes) = self.mailboxes.try_write() else {
            return Retirement::Contended;
        };
        // Senders only send under the registry lock, so nothing arrives past this check
        if let Ok(job) = rx.try_recv() {
            return Retirement::Pending(job);
        }
        if mailboxes
            .get(&self.document_id)
            .is_some_and(|mailbox| mailbox.generation == self.generation)
        {
            mailboxes.remove(&self.document_id);
        }
        rx.close();
        Retirement::Retired
    }

    async fn load_document(&self) -> Result<Record, SyncError> {
        self.store
            .find(DOCUMENT, &self.document_id)
            .await?
            .ok_or_else(|| SyncError::DocumentMissing(self.document_id.clone()))
    }

    async fn apply(&self, change: ChangeRequest) -> Result<Record, SyncError> {
        let document = self.load_document().await?;
        let head_id = document
            .to_one(members::LATEST_SNAPSHOT)
            .ok_or_else(|| StoreError::Corrupt(format!("document {} has no head snapshot", self.document_id)))?
            .to_string();

        if change.parent != head_id {
            return Err(self.parent_mismatch(change.parent, head_id).await);
        }

        let type_name = document.field_str(members::TYPE).unwrap_or_default();
        let edit_type = self
            .types
            .get(type_name)
            .ok_or_else(|| SyncError::UnknownType(type_name.to_string()))?;

        let head = self
            .store
            .find(SNAPSHOT, &head_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("head snapshot {} is missing", head_id)))?;
        let current = head.field(members::CONTENT).cloned().unwrap_or_else(|| edit_type.create());
        let content = edit_type
            .apply(&current, &change.changeset)
            .map_err(SyncError::InvalidChangeset)?;

        let draft = RecordDraft::new()
            .field(members::CONTENT, content)
            .to_one(members::DOCUMENT, Some(self.document_id.as_str()))
            .to_one(members::PARENT, Some(head_id.as_str()))
            .to_one(members::AUTHOR, change.author.as_deref());
        let snapshot = self.store.create(SNAPSHOT, draft).await?;

        if let Err(err) = self.advance_head(&snapshot.id).await {
            error!(
                "Failed to advance document {} to snapshot {}: {}",
                self.document_id, snapshot.id, err
            );
            self.discard_snapshot(&snapshot.id).await;
            return Err(err);
        }

        debug!("Document {} advanced to snapshot {}", self.document_id, snapshot.id);
        Ok(snapshot)
    }

    async fn parent_mismatch(&self, parent: RecordId, head: RecordId) -> SyncError {
        match self.store.find(SNAPSHOT, &parent).await {
            Ok(Some(snapshot)) if snapshot.to_one(members::DOCUMENT) == Some(self.document_id.as_str()) => {
                SyncError::StaleParent { parent, head }
            }
            Ok(_) => SyncError::UnknownParent(parent),
            Err(err) => err.into(),
        }
    }

    async fn advance_head(&self, snapshot_id: &str) -> Result<(), SyncError> {
        let linked = self
            .store
            .add_links(DOCUMENT, &self.document_id, members::SNAPSHOTS, &[snapshot_id.to_string()])
            .await?;
        if !linked {
            return Err(SyncError::DocumentMissing(self.document_id.clone()));
        }
        self.store
            .update(
                DOCUMENT,
                &self.document_id,
                RecordDraft::new().to_one(members::LATEST_SNAPSHOT, Some(snapshot_id)),
            )
            .await?
            .ok_or_else(|| SyncError::DocumentMissing(self.document_id.clone()))?;
        Ok(())
    }

    async fn discard_snapshot(&self, snapshot_id: &str) {
        let ids = [snapshot_id.to_string()];
        if let Err(err) = self
            .store
            .remove_links(DOCUMENT, &self.document_id, members::SNAPSHOTS, &ids)
            .await
        {
            error!("Failed to unlink snapshot {}: {}", snapshot_id, err);
        }
        if let Err(err) = self.store.destroy(&[RecordRef::new(SNAPSHOT, snapshot_id)]).await {
            error!("Failed to discard snapshot {}: {}", snapshot_id, err);
        }
    }

    async fn destroy(&self) -> Result<u64, SyncError> {
        let document = self.load_document().await?;

        let mut snapshot_ids: BTreeSet<RecordId> = document.to_many(members::SNAPSHOTS).iter().cloned().collect();
        let owned = self
            .store
            .find_by(SNAPSHOT, &Filter::new().eq(members::DOCUMENT, self.document_id.as_str()))
            .await?;
        snapshot_ids.extend(owned.into_iter().map(|s| s.id));

        let mut targets = vec![RecordRef::new(DOCUMENT, &self.document_id)];
        targets.extend(snapshot_ids.iter().map(|id| RecordRef::new(SNAPSHOT, id)));

        let removed = self.store.destroy(&targets).await?;
        debug!(
            "Destroyed document {} with {} snapshots",
            self.document_id,
            snapshot_ids.len()
        );
        Ok(removed)
    }
}
