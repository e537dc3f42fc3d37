use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Opaque, stable record identifier
pub type RecordId = String;

/// Current target(s) of a relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    One(Option<RecordId>),
    Many(Vec<RecordId>),
}

impl Linkage {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Linkage::One(id) => id.iter().map(String::as_str).collect(),
            Linkage::Many(ids) => ids.iter().map(String::as_str).collect(),
        }
    }

    /// Add an id to a to-many linkage; duplicates are ignored
    pub fn insert(&mut self, id: &str) -> bool {
        match self {
            Linkage::Many(ids) if !ids.iter().any(|existing| existing == id) => {
                ids.push(id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Remove an id from a to-many linkage; non-members are ignored
    pub fn remove(&mut self, id: &str) -> bool {
        match self {
            Linkage::Many(ids) => {
                let before = ids.len();
                ids.retain(|existing| existing != id);
                ids.len() != before
            }
            Linkage::One(_) => false,
        }
    }
}

/// Flat internal record: scalar fields plus relation linkage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Linkage>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Target of a to-one relation, if set
    pub fn to_one(&self, relation: &str) -> Option<&str> {
        match self.relations.get(relation) {
            Some(Linkage::One(Some(id))) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Members of a to-many relation, empty when unset
    pub fn to_many(&self, relation: &str) -> &[RecordId] {
        match self.relations.get(relation) {
            Some(Linkage::Many(ids)) => ids,
            _ => &[],
        }
    }

    /// Apply a draft: present keys replace existing values, absent keys are kept
    pub fn apply(&mut self, draft: RecordDraft) {
        self.fields.extend(draft.fields);
        self.relations.extend(draft.relations);
    }
}

/// Field and relation values for a create or a partial update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDraft {
    pub fields: Map<String, Value>,
    pub relations: BTreeMap<String, Linkage>,
}

impl RecordDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn to_one(mut self, relation: &str, id: Option<&str>) -> Self {
        self.relations
            .insert(relation.to_string(), Linkage::One(id.map(str::to_string)));
        self
    }

    pub fn to_many(mut self, relation: &str, ids: Vec<RecordId>) -> Self {
        self.relations.insert(relation.to_string(), Linkage::Many(ids));
        self
    }

    pub fn into_record(self, id: RecordId) -> Record {
        Record {
            id,
            fields: self.fields,
            relations: self.relations,
        }
    }
}

/// Equality filter over scalar fields and to-one relations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub criteria: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.criteria.push((name.to_string(), value.into()));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.criteria.iter().all(|(name, expected)| {
            if let Some(actual) = record.fields.get(name) {
                return actual == expected;
            }
            match record.relations.get(name) {
                Some(Linkage::One(Some(id))) => expected.as_str() == Some(id.as_str()),
                _ => expected.is_null(),
            }
        })
    }
}

/// Identifies one record for batch operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub resource: String,
    pub id: RecordId,
}

impl RecordRef {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

/// Outcome of an idempotent create
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    New(Record),
    Existing(Record),
}

impl Created {
    pub fn record(&self) -> &Record {
        match self {
            Created::New(r) | Created::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            Created::New(r) | Created::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }
}
