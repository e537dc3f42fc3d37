//! Wire <-> record transform.
//!
//! Inbound bodies are parsed into a [`ResourceDocument`], either from a JSON:API
//! `data` envelope or from a plain JSON object whose keys are classified against
//! the resource descriptor. Outbound records are rendered as JSON:API resource
//! objects with relationship linkage and optional sparse fieldsets.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::database::{Linkage, Record, RecordDraft, RecordId};
use crate::error::ApiError;
use crate::schema::{Relation, ResourceDescriptor};

pub const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";
pub const API_PREFIX: &str = "/api/v1";

/// Reference to a related resource inside a linkage block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentifier {
    pub resource_type: Option<String>,
    pub id: RecordId,
}

/// Linkage carried by a request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipData {
    ToOne(Option<ResourceIdentifier>),
    ToMany(Vec<ResourceIdentifier>),
}

impl RelationshipData {
    /// Parse `null`, `{id}`, `"id"` or an array of those
    pub fn parse(value: &Value) -> Result<Self, ApiError> {
        match value {
            Value::Null => Ok(RelationshipData::ToOne(None)),
            Value::Array(items) => items
                .iter()
                .map(parse_identifier)
                .collect::<Result<Vec<_>, _>>()
                .map(RelationshipData::ToMany),
            other => parse_identifier(other).map(|id| RelationshipData::ToOne(Some(id))),
        }
    }

    /// Parse a relationship endpoint body: `{"data": ...}`, or bare linkage
    pub fn from_body(body: &Value) -> Result<Self, ApiError> {
        match body.as_object().and_then(|obj| obj.get("data")) {
            Some(data) => Self::parse(data),
            None => Self::parse(body),
        }
    }

    /// Check referenced types against the relation and flatten to ids
    pub fn into_linkage(self, relation: &Relation) -> Result<Linkage, ApiError> {
        let expected = relation.related_collection();
        let check = |ident: ResourceIdentifier| -> Result<RecordId, ApiError> {
            match ident.resource_type {
                Some(t) if t != expected => Err(ApiError::conflict(format!(
                    "relationship '{}' expects type '{}', got '{}'",
                    relation.name, expected, t
                ))),
                _ => Ok(ident.id),
            }
        };
        match (self, relation.is_to_many()) {
            (RelationshipData::ToOne(ident), false) => Ok(Linkage::One(ident.map(check).transpose()?)),
            (RelationshipData::ToMany(idents), true) => Ok(Linkage::Many(dedup(
                idents.into_iter().map(check).collect::<Result<Vec<_>, _>>()?,
            ))),
            (RelationshipData::ToOne(_), true) => Err(ApiError::bad_request(format!(
                "relationship '{}' is to-many and requires an array of linkage",
                relation.name
            ))),
            (RelationshipData::ToMany(_), false) => Err(ApiError::bad_request(format!(
                "relationship '{}' is to-one and requires a single linkage, not an array",
                relation.name
            ))),
        }
    }
}

fn dedup(ids: Vec<RecordId>) -> Vec<RecordId> {
    let mut out: Vec<RecordId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn parse_identifier(value: &Value) -> Result<ResourceIdentifier, ApiError> {
    match value {
        Value::String(id) => Ok(ResourceIdentifier { resource_type: None, id: id.clone() }),
        Value::Object(obj) => {
            let id = match obj.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(ApiError::bad_request("resource identifier requires an 'id'")),
            };
            let resource_type = match obj.get("type") {
                None | Some(Value::Null) => None,
                Some(Value::String(t)) => Some(t.clone()),
                Some(_) => return Err(ApiError::bad_request("resource identifier 'type' must be a string")),
            };
            Ok(ResourceIdentifier { resource_type, id })
        }
        _ => Err(ApiError::bad_request("linkage must be null, an identifier object or an array")),
    }
}

/// Tagged representation of an inbound resource body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDocument {
    pub id: Option<String>,
    pub resource_type: Option<String>,
    pub attributes: Map<String, Value>,
    pub relationships: BTreeMap<String, RelationshipData>,
    /// Whether the body used the JSON:API `data` envelope
    pub enveloped: bool,
}

impl ResourceDocument {
    pub fn parse(body: &Value, descriptor: &ResourceDescriptor) -> Result<Self, ApiError> {
        let obj = body
            .as_object()
            .ok_or_else(|| ApiError::bad_request("request body must be a JSON object"))?;

        match obj.get("data") {
            Some(data) => Self::parse_envelope(data, descriptor),
            None => Self::parse_plain(obj, descriptor),
        }
    }

    fn parse_envelope(data: &Value, descriptor: &ResourceDescriptor) -> Result<Self, ApiError> {
        let data = data
            .as_object()
            .ok_or_else(|| ApiError::bad_request("'data' must be a resource object"))?;

        let resource_type = match data.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(t)) if *t == descriptor.collection() => Some(t.clone()),
            Some(Value::String(t)) => {
                return Err(ApiError::conflict(format!(
                    "resource type '{}' does not match endpoint type '{}'",
                    t,
                    descriptor.collection()
                )))
            }
            Some(_) => return Err(ApiError::bad_request("'data.type' must be a string")),
        };
        let id = optional_id(data.get("id"))?;

        let attributes = match data.get("attributes") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(attrs)) => attrs.clone(),
            Some(_) => return Err(ApiError::bad_request("'data.attributes' must be an object")),
        };

        let mut relationships = BTreeMap::new();
        match data.get("relationships") {
            None | Some(Value::Null) => {}
            Some(Value::Object(rels)) => {
                for (name, rel) in rels {
                    let linkage = rel
                        .as_object()
                        .and_then(|r| r.get("data"))
                        .ok_or_else(|| ApiError::bad_request(format!("relationship '{}' requires a 'data' member", name)))?;
                    relationships.insert(name.clone(), RelationshipData::parse(linkage)?);
                }
            }
            Some(_) => return Err(ApiError::bad_request("'data.relationships' must be an object")),
        }

        Ok(Self {
            id,
            resource_type,
            attributes,
            relationships,
            enveloped: true,
        })
    }

    fn parse_plain(obj: &Map<String, Value>, descriptor: &ResourceDescriptor) -> Result<Self, ApiError> {
        let mut doc = Self {
            id: optional_id(obj.get("id"))?,
            ..Self::default()
        };
        for (key, value) in obj {
            if key == "id" {
                continue;
            }
            if descriptor.relation(key).is_some() {
                doc.relationships.insert(key.clone(), RelationshipData::parse(value)?);
            } else {
                // Unknown keys are rejected when converted to a draft
                doc.attributes.insert(key.clone(), value.clone());
            }
        }
        Ok(doc)
    }

    /// Validate against the descriptor and convert to field/linkage values
    pub fn into_draft(self, descriptor: &ResourceDescriptor) -> Result<RecordDraft, ApiError> {
        let mut draft = RecordDraft::new();
        for (name, value) in self.attributes {
            if !descriptor.has_field(&name) {
                return Err(ApiError::bad_request(format!(
                    "'{}' is not an attribute of {}",
                    name,
                    descriptor.collection()
                )));
            }
            draft.fields.insert(name, value);
        }
        for (name, data) in self.relationships {
            let relation = descriptor.relation(&name).ok_or_else(|| {
                ApiError::bad_request(format!("'{}' is not a relationship of {}", name, descriptor.collection()))
            })?;
            draft.relations.insert(name, data.into_linkage(relation)?);
        }
        Ok(draft)
    }
}

fn optional_id(value: Option<&Value>) -> Result<Option<String>, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ApiError::bad_request("'id' must be a string")),
    }
}

/// Sparse fieldsets from `fields[<type>]=a,b` query parameters, keyed by type
pub fn fieldsets_from_query(query: &HashMap<String, String>) -> HashMap<String, Vec<String>> {
    query
        .iter()
        .filter_map(|(key, value)| {
            let resource_type = key.strip_prefix("fields[")?.strip_suffix(']')?;
            let names = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            Some((resource_type.to_string(), names))
        })
        .collect()
}

/// Reject fieldset members the descriptor does not declare
pub fn validate_fieldset(descriptor: &ResourceDescriptor, fields: &[String]) -> Result<(), ApiError> {
    match fields
        .iter()
        .find(|name| !descriptor.has_field(name) && descriptor.relation(name).is_none())
    {
        Some(unknown) => Err(ApiError::bad_request(format!(
            "fieldset member '{}' is not declared on {}",
            unknown,
            descriptor.collection()
        ))),
        None => Ok(()),
    }
}

fn identifier(relation: &Relation, id: &str) -> Value {
    json!({ "type": relation.related_collection(), "id": id })
}

/// Linkage block value for a relation (`null`, identifier or array)
pub fn linkage_to_api_value(relation: &Relation, linkage: Option<&Linkage>) -> Value {
    match (relation.is_to_many(), linkage) {
        (true, Some(Linkage::Many(ids))) => Value::Array(ids.iter().map(|id| identifier(relation, id)).collect()),
        (true, _) => Value::Array(Vec::new()),
        (false, Some(Linkage::One(Some(id)))) => identifier(relation, id),
        (false, _) => Value::Null,
    }
}

/// Convert a record into a JSON:API resource object
/// { type, id, attributes, relationships, links }
pub fn record_to_api_value(
    record: &Record,
    descriptor: &ResourceDescriptor,
    fieldset: Option<&[String]>,
) -> Value {
    let collection = descriptor.collection();
    let self_link = format!("{}/{}/{}", API_PREFIX, collection, record.id);
    let included = |name: &str| fieldset.map_or(true, |f| f.iter().any(|n| n == name));

    let mut attributes = Map::new();
    for field in descriptor.fields.iter().filter(|f| included(f.as_str())) {
        attributes.insert(
            field.clone(),
            record.fields.get(field).cloned().unwrap_or(Value::Null),
        );
    }

    let mut relationships = Map::new();
    for relation in descriptor.relations.iter().filter(|r| included(r.name.as_str())) {
        relationships.insert(
            relation.name.clone(),
            json!({
                "data": linkage_to_api_value(relation, record.relations.get(&relation.name)),
                "links": {
                    "self": format!("{}/relationships/{}", self_link, relation.name),
                },
            }),
        );
    }

    let mut obj = Map::new();
    obj.insert("type".into(), Value::String(collection));
    obj.insert("id".into(), Value::String(record.id.clone()));
    obj.insert("attributes".into(), Value::Object(attributes));
    if !relationships.is_empty() {
        obj.insert("relationships".into(), Value::Object(relationships));
    }
    obj.insert("links".into(), json!({ "self": self_link }));
    Value::Object(obj)
}

/// Convert a list of records to API values
pub fn records_to_api_values(records: &[Record], descriptor: &ResourceDescriptor) -> Vec<Value> {
    records
        .iter()
        .map(|r| record_to_api_value(r, descriptor, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Registry, DOCUMENT, SNAPSHOT, USER};

    fn registry() -> Registry {
        Registry::builtin().unwrap()
    }

    #[test]
    fn parses_jsonapi_envelope() {
        let registry = registry();
        let snapshot = registry.get(SNAPSHOT).unwrap();
        let body = json!({
            "data": {
                "type": "snapshots",
                "attributes": { "content": "foo" },
                "relationships": {
                    "parent": { "data": null },
                    "document": { "data": { "type": "documents", "id": "d1" } }
                }
            }
        });

        let doc = ResourceDocument::parse(&body, snapshot).unwrap();
        assert!(doc.enveloped);
        let draft = doc.into_draft(snapshot).unwrap();
        assert_eq!(draft.fields["content"], json!("foo"));
        assert_eq!(draft.relations["parent"], Linkage::One(None));
        assert_eq!(draft.relations["document"], Linkage::One(Some("d1".into())));
    }

    #[test]
    fn plain_bodies_are_classified_by_descriptor() {
        let registry = registry();
        let document = registry.get(DOCUMENT).unwrap();
        let doc = ResourceDocument::parse(&json!({ "type": "plaintext", "snapshots": ["s1", "s1"] }), document).unwrap();
        assert!(!doc.enveloped);
        let draft = doc.into_draft(document).unwrap();
        assert_eq!(draft.fields["type"], json!("plaintext"));
        assert_eq!(draft.relations["snapshots"], Linkage::Many(vec!["s1".into()]));
    }

    #[test]
    fn rejects_undeclared_members_and_wrong_cardinality() {
        let registry = registry();
        let user = registry.get(USER).unwrap();
        let err = ResourceDocument::parse(&json!({ "nickname": "x" }), user)
            .unwrap()
            .into_draft(user)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let document = registry.get(DOCUMENT).unwrap();
        let err = ResourceDocument::parse(&json!({ "latestSnapshot": ["s1"] }), document)
            .unwrap()
            .into_draft(document)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn type_mismatches_conflict() {
        let registry = registry();
        let user = registry.get(USER).unwrap();
        let err = ResourceDocument::parse(&json!({ "data": { "type": "documents" } }), user).unwrap_err();
        assert_eq!(err.status_code(), 409);

        let snapshot = registry.get(SNAPSHOT).unwrap();
        let body = json!({ "data": { "relationships": { "author": { "data": { "type": "documents", "id": "1" } } } } });
        let err = ResourceDocument::parse(&body, snapshot).unwrap().into_draft(snapshot).unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn serializes_linkage_and_sparse_fieldsets() {
        let registry = registry();
        let document = registry.get(DOCUMENT).unwrap();
        let record = RecordDraft::new()
            .field("type", "plaintext")
            .to_one("latestSnapshot", Some("s2"))
            .to_many("snapshots", vec!["s1".into(), "s2".into()])
            .into_record("d1".into());

        let full = record_to_api_value(&record, document, None);
        assert_eq!(full["type"], "documents");
        assert_eq!(full["attributes"]["type"], "plaintext");
        assert_eq!(full["relationships"]["latestSnapshot"]["data"], json!({ "type": "snapshots", "id": "s2" }));
        assert_eq!(full["relationships"]["snapshots"]["data"].as_array().unwrap().len(), 2);
        assert_eq!(full["links"]["self"], "/api/v1/documents/d1");

        let fields = vec!["latestSnapshot".to_string()];
        let sparse = record_to_api_value(&record, document, Some(fields.as_slice()));
        assert!(sparse["attributes"].as_object().unwrap().is_empty());
        assert!(sparse["relationships"].get("snapshots").is_none());
    }

    #[test]
    fn fieldset_query_parsing() {
        let mut query = HashMap::new();
        query.insert("fields[users]".to_string(), "name, externalId".to_string());
        query.insert("since".to_string(), "s1".to_string());
        let sets = fieldsets_from_query(&query);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets["users"], vec!["name".to_string(), "externalId".to_string()]);

        let registry = registry();
        assert!(validate_fieldset(registry.get(USER).unwrap(), &sets["users"]).is_ok());
        assert!(validate_fieldset(registry.get(USER).unwrap(), &["password".to_string()]).is_err());
    }

    #[test]
    fn relationship_bodies() {
        assert_eq!(
            RelationshipData::from_body(&json!({ "data": null })).unwrap(),
            RelationshipData::ToOne(None)
        );
        assert_eq!(
            RelationshipData::from_body(&json!({ "data": [{ "id": "a" }, "b"] })).unwrap(),
            RelationshipData::ToMany(vec![
                ResourceIdentifier { resource_type: None, id: "a".into() },
                ResourceIdentifier { resource_type: None, id: "b".into() },
            ])
        );
        assert!(RelationshipData::from_body(&json!({ "data": true })).is_err());
    }
}
