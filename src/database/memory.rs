use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::record::{Created, Filter, Linkage, Record, RecordDraft, RecordId, RecordRef};
use super::store::{unique_conflict, unique_values, Store, StoreError};

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<u64, Record>,
    ids: HashMap<RecordId, u64>,
}

#[derive(Debug, Default)]
struct Tables {
    tables: HashMap<String, Table>,
    next_seq: u64,
}

impl Tables {
    fn insert(&mut self, resource: &str, record: Record) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let table = self.tables.entry(resource.to_string()).or_default();
        table.ids.insert(record.id.clone(), seq);
        table.rows.insert(seq, record);
    }

    fn get(&self, resource: &str, id: &str) -> Option<&Record> {
        let table = self.tables.get(resource)?;
        table.ids.get(id).and_then(|seq| table.rows.get(seq))
    }

    fn get_mut(&mut self, resource: &str, id: &str) -> Option<&mut Record> {
        let table = self.tables.get_mut(resource)?;
        let seq = *table.ids.get(id)?;
        table.rows.get_mut(&seq)
    }

    fn matching(&self, resource: &str, filter: &Filter) -> Vec<Record> {
        self.tables
            .get(resource)
            .map(|table| table.rows.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default()
    }
}

/// In-process store used for development and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id() -> RecordId {
        Uuid::new_v4().to_string()
    }
}

fn links_mut<'a>(record: &'a mut Record, relation: &str) -> &'a mut Linkage {
    record
        .relations
        .entry(relation.to_string())
        .or_insert_with(|| Linkage::Many(Vec::new()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, resource: &str, draft: RecordDraft) -> Result<Record, StoreError> {
        let record = draft.into_record(Self::new_id());
        self.inner.write().await.insert(resource, record.clone());
        Ok(record)
    }

    async fn create_unique(
        &self,
        resource: &str,
        draft: RecordDraft,
        key: &[String],
    ) -> Result<Created, StoreError> {
        let mut tables = self.inner.write().await;
        if let Some(filter) = unique_values(&draft.fields, key) {
            if let Some(existing) = tables.matching(resource, &filter).into_iter().next() {
                return Ok(Created::Existing(existing));
            }
        }
        let record = draft.into_record(Self::new_id());
        tables.insert(resource, record.clone());
        Ok(Created::New(record))
    }

    async fn find(&self, resource: &str, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.inner.read().await.get(resource, id).cloned())
    }

    async fn find_by(&self, resource: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self.inner.read().await.matching(resource, filter))
    }

    async fn update(
        &self,
        resource: &str,
        id: &str,
        changes: RecordDraft,
    ) -> Result<Option<Record>, StoreError> {
        let mut tables = self.inner.write().await;
        Ok(tables.get_mut(resource, id).map(|record| {
            record.apply(changes);
            record.clone()
        }))
    }

    async fn update_unique(
        &self,
        resource: &str,
        id: &str,
        changes: RecordDraft,
        key: &[String],
    ) -> Result<Option<Record>, StoreError> {
        let mut tables = self.inner.write().await;
        let Some(mut merged) = tables.get(resource, id).cloned() else {
            return Ok(None);
        };
        merged.apply(changes);
        if let Some(filter) = unique_values(&merged.fields, key) {
            if tables.matching(resource, &filter).iter().any(|other| other.id != id) {
                return Err(unique_conflict(resource, key));
            }
        }
        Ok(tables.get_mut(resource, id).map(|record| {
            *record = merged;
            record.clone()
        }))
    }

    async fn add_links(
        &self,
        resource: &str,
        id: &str,
        relation: &str,
        ids: &[RecordId],
    ) -> Result<bool, StoreError> {
        let mut tables = self.inner.write().await;
        let Some(record) = tables.get_mut(resource, id) else {
            return Ok(false);
        };
        let linkage = links_mut(record, relation);
        if !matches!(linkage, Linkage::Many(_)) {
            return Err(StoreError::Invalid(format!("relation '{}' is not to-many", relation)));
        }
        for target in ids {
            linkage.insert(target);
        }
        Ok(true)
    }

    async fn remove_links(
        &self,
        resource: &str,
        id: &str,
        relation: &str,
        ids: &[RecordId],
    ) -> Result<bool, StoreError> {
        let mut tables = self.inner.write().await;
        let Some(record) = tables.get_mut(resource, id) else {
            return Ok(false);
        };
        let linkage = links_mut(record, relation);
        for target in ids {
            linkage.remove(target);
        }
        Ok(true)
    }

    async fn destroy(&self, targets: &[RecordRef]) -> Result<u64, StoreError> {
        // A single write guard makes the batch atomic for readers
        let mut tables = self.inner.write().await;
        let mut removed = 0;
        for target in targets {
            if let Some(table) = tables.tables.get_mut(&target.resource) {
                if let Some(seq) = table.ids.remove(&target.id) {
                    table.rows.remove(&seq);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_find_update_destroy() {
        let store = MemoryStore::new();
        let user = store.create("user", RecordDraft::new().field("name", "Foo Bar")).await.unwrap();

        let found = store.find("user", &user.id).await.unwrap().unwrap();
        assert_eq!(found.field_str("name"), Some("Foo Bar"));
        assert!(store.find("document", &user.id).await.unwrap().is_none());

        let updated = store
            .update("user", &user.id, RecordDraft::new().field("name", "baz"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.field_str("name"), Some("baz"));
        assert!(store.update("user", "missing", RecordDraft::new()).await.unwrap().is_none());

        assert_eq!(store.destroy(&[RecordRef::new("user", &user.id)]).await.unwrap(), 1);
        assert!(store.find("user", &user.id).await.unwrap().is_none());
        assert_eq!(store.destroy(&[RecordRef::new("user", &user.id)]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_unique_returns_existing_record() {
        let store = MemoryStore::new();
        let key = vec!["externalType".to_string(), "externalId".to_string()];
        let draft = RecordDraft::new()
            .field("name", "Foo")
            .field("externalType", "github")
            .field("externalId", json!(1234));

        let first = store.create_unique("user", draft.clone(), &key).await.unwrap();
        let second = store.create_unique("user", draft, &key).await.unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.record().id, second.record().id);

        // Missing key members never collide
        let anonymous = RecordDraft::new().field("name", "Anon");
        let a = store.create_unique("user", anonymous.clone(), &key).await.unwrap();
        let b = store.create_unique("user", anonymous, &key).await.unwrap();
        assert_ne!(a.record().id, b.record().id);
    }

    #[tokio::test]
    async fn update_unique_rejects_a_taken_key() {
        let store = MemoryStore::new();
        let key = vec!["externalType".to_string(), "externalId".to_string()];
        let draft = |id: &str| RecordDraft::new().field("externalType", "gh").field("externalId", id);
        store.create_unique("user", draft("1"), &key).await.unwrap();
        let b = store.create_unique("user", draft("2"), &key).await.unwrap().record().clone();

        let err = store
            .update_unique("user", &b.id, RecordDraft::new().field("externalId", "1"), &key)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let unchanged = store.find("user", &b.id).await.unwrap().unwrap();
        assert_eq!(unchanged.field_str("externalId"), Some("2"));

        let moved = store
            .update_unique("user", &b.id, RecordDraft::new().field("externalId", "3"), &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.field_str("externalId"), Some("3"));
        assert!(store
            .update_unique("user", "missing", RecordDraft::new(), &key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn find_by_preserves_creation_order() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store
                .create("snapshot", RecordDraft::new().field("content", n).to_one("document", Some("d1")))
                .await
                .unwrap();
        }
        store
            .create("snapshot", RecordDraft::new().to_one("document", Some("d2")))
            .await
            .unwrap();

        let found = store.find_by("snapshot", &Filter::new().eq("document", "d1")).await.unwrap();
        let contents: Vec<_> = found.iter().map(|r| r.field("content").cloned().unwrap()).collect();
        assert_eq!(contents, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn links_are_set_like_and_report_missing_owner() {
        let store = MemoryStore::new();
        let doc = store.create("document", RecordDraft::new()).await.unwrap();

        assert!(store.add_links("document", &doc.id, "snapshots", &["a".into(), "b".into()]).await.unwrap());
        assert!(store.add_links("document", &doc.id, "snapshots", &["a".into()]).await.unwrap());
        assert!(store.remove_links("document", &doc.id, "snapshots", &["zz".into()]).await.unwrap());
        let doc = store.find("document", &doc.id).await.unwrap().unwrap();
        assert_eq!(doc.to_many("snapshots"), &["a".to_string(), "b".to_string()]);

        assert!(!store.add_links("document", "missing", "snapshots", &["a".into()]).await.unwrap());
    }
}
