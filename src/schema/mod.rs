//! Resource schema registry.
//!
//! The registry is the immutable table of resource descriptors the route
//! generators iterate over. It is built once from a YAML schema source and
//! shared behind an `Arc` for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

const DEFAULT_SCHEMA: &str = include_str!("default.yaml");

/// Resources the document version engine depends on
pub const USER: &str = "user";
pub const DOCUMENT: &str = "document";
pub const SNAPSHOT: &str = "snapshot";

/// Member names on the engine resources
pub mod members {
    pub const TYPE: &str = "type";
    pub const CONTENT: &str = "content";
    pub const LATEST_SNAPSHOT: &str = "latestSnapshot";
    pub const SNAPSHOTS: &str = "snapshots";
    pub const DOCUMENT: &str = "document";
    pub const PARENT: &str = "parent";
    pub const AUTHOR: &str = "author";
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read schema source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid schema: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub cardinality: Cardinality,
    /// Name of the related resource
    pub resource: String,
}

impl Relation {
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// JSON:API `type` of the related resource
    pub fn related_collection(&self) -> String {
        format!("{}s", self.resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Field set on which creation is idempotent
    #[serde(default)]
    pub unique: Option<Vec<String>>,
}

impl ResourceDescriptor {
    /// Collection segment used in paths and as the JSON:API `type`
    pub fn collection(&self) -> String {
        format!("{}s", self.name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Capability token for an action on this resource, e.g. `user:read`
    pub fn capability(&self, action: &str) -> String {
        format!("{}:{}", self.name, action)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaSource {
    resources: Vec<ResourceDescriptor>,
}

/// Immutable, process-wide table of resource descriptors
#[derive(Debug, Clone)]
pub struct Registry {
    resources: Vec<ResourceDescriptor>,
    by_name: BTreeMap<String, usize>,
}

impl Registry {
    /// Registry for the embedded default schema
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_yaml(DEFAULT_SCHEMA)
    }

    pub fn from_yaml(source: &str) -> Result<Self, RegistryError> {
        let parsed: SchemaSource = serde_yaml::from_str(source)?;
        Self::new(parsed.resources)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    /// Load from the configured path, falling back to the embedded default
    pub fn from_config(config: &crate::config::SchemaConfig) -> Result<Self, RegistryError> {
        match &config.path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn new(resources: Vec<ResourceDescriptor>) -> Result<Self, RegistryError> {
        let mut by_name = BTreeMap::new();
        for (index, resource) in resources.iter().enumerate() {
            validate_identifier("resource", &resource.name)?;
            if by_name.insert(resource.name.clone(), index).is_some() {
                return Err(RegistryError::Invalid(format!("resource '{}' declared twice", resource.name)));
            }
        }

        let registry = Self { resources, by_name };
        for resource in &registry.resources {
            registry.validate_resource(resource)?;
        }
        registry.validate_engine_resources()?;

        tracing::debug!("Loaded schema registry with {} resources", registry.resources.len());
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.by_name.get(name).map(|&i| &self.resources[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn validate_resource(&self, resource: &ResourceDescriptor) -> Result<(), RegistryError> {
        let mut names = HashSet::new();
        for field in &resource.fields {
            validate_identifier("field", field)?;
            if field == "id" || !names.insert(field.as_str()) {
                return Err(RegistryError::Invalid(format!(
                    "field '{}' on '{}' is reserved or duplicated",
                    field, resource.name
                )));
            }
        }
        for relation in &resource.relations {
            validate_identifier("relation", &relation.name)?;
            if relation.name == "id" || !names.insert(relation.name.as_str()) {
                return Err(RegistryError::Invalid(format!(
                    "relation '{}' on '{}' clashes with another member",
                    relation.name, resource.name
                )));
            }
            if self.get(&relation.resource).is_none() {
                return Err(RegistryError::Invalid(format!(
                    "relation '{}.{}' points at unknown resource '{}'",
                    resource.name, relation.name, relation.resource
                )));
            }
        }
        if let Some(key) = &resource.unique {
            if key.is_empty() || key.iter().any(|f| !resource.has_field(f)) {
                return Err(RegistryError::Invalid(format!(
                    "unique key {:?} on '{}' must name declared fields",
                    key, resource.name
                )));
            }
        }
        Ok(())
    }

    fn validate_engine_resources(&self) -> Result<(), RegistryError> {
        let expectations: &[(&str, &[&str], &[(&str, Cardinality, &str)])] = &[
            (USER, &["name", "externalType", "externalId"], &[]),
            (
                DOCUMENT,
                &["type"],
                &[
                    ("latestSnapshot", Cardinality::One, SNAPSHOT),
                    ("snapshots", Cardinality::Many, SNAPSHOT),
                ],
            ),
            (
                SNAPSHOT,
                &["content"],
                &[
                    ("document", Cardinality::One, DOCUMENT),
                    ("parent", Cardinality::One, SNAPSHOT),
                    ("author", Cardinality::One, USER),
                ],
            ),
        ];

        for (name, fields, relations) in expectations {
            let resource = self
                .get(name)
                .ok_or_else(|| RegistryError::Invalid(format!("required resource '{}' is missing", name)))?;
            for field in *fields {
                if !resource.has_field(field) {
                    return Err(RegistryError::Invalid(format!("resource '{}' must declare field '{}'", name, field)));
                }
            }
            for (rel, cardinality, target) in *relations {
                match resource.relation(rel) {
                    Some(r) if r.cardinality == *cardinality && r.resource == *target => {}
                    _ => {
                        return Err(RegistryError::Invalid(format!(
                            "resource '{}' must declare {:?} relation '{}' to '{}'",
                            name, cardinality, rel, target
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_identifier(kind: &str, name: &str) -> Result<(), RegistryError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::Invalid(format!("{} name '{}' is not a valid identifier", kind, name)))
    }
}
