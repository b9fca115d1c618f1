//! Per-entity-type mapping from attribute FQNs to entity document paths.

use std::collections::BTreeMap;

use eqs_contracts::{ATTRIBUTES_PREFIX, ENTITY_ID_PATH, ENTITY_NAME_PATH};
use serde::Deserialize;

/// One configured mapping: within entity type `scope`, FQN `name` lives at
/// `sub_doc_path`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeMappingEntry {
    pub scope: String,
    pub name: String,
    pub sub_doc_path: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AttributeMapError {
    #[error("attribute map is not a valid JSON array of mappings: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("attribute mapping #{index} has an empty `{field}`")]
    EmptyField { index: usize, field: &'static str },
    #[error(
        "attribute mapping #{index} has unsupported sub_doc_path `{path}` \
         (expected entity_id, entity_name or attributes.<key>)"
    )]
    InvalidPath { index: usize, path: String },
}

/// Where a mapped FQN lives inside an entity document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPath {
    EntityId,
    EntityName,
    /// Key into the entity's attribute bag.
    Attribute(String),
}

impl DocumentPath {
    pub fn parse(sub_doc_path: &str) -> Option<Self> {
        match sub_doc_path {
            ENTITY_ID_PATH => Some(DocumentPath::EntityId),
            ENTITY_NAME_PATH => Some(DocumentPath::EntityName),
            other => {
                let key = other.strip_prefix(ATTRIBUTES_PREFIX)?;
                if key.is_empty() || key.contains('.') {
                    return None;
                }
                Some(DocumentPath::Attribute(key.to_string()))
            }
        }
    }

    /// Dotted sub-document path as stored.
    pub fn sub_doc_path(&self) -> String {
        match self {
            DocumentPath::EntityId => ENTITY_ID_PATH.to_string(),
            DocumentPath::EntityName => ENTITY_NAME_PATH.to_string(),
            DocumentPath::Attribute(key) => format!("{}{}", ATTRIBUTES_PREFIX, key),
        }
    }
}

/// FQN table of a single entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FqnTable {
    paths: BTreeMap<String, DocumentPath>,
}

impl FqnTable {
    pub fn resolve(&self, fqn: &str) -> Option<&DocumentPath> {
        self.paths.get(fqn)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Read-only after construction; shared behind an `Arc` for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    scopes: BTreeMap<String, FqnTable>,
}

impl AttributeMap {
    /// Builds the map in entry order; a later entry for the same
    /// `(scope, name)` replaces the earlier one.
    pub fn from_entries<I>(entries: I) -> Result<Self, AttributeMapError>
    where
        I: IntoIterator<Item = AttributeMappingEntry>,
    {
        let mut scopes: BTreeMap<String, FqnTable> = BTreeMap::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let scope = entry.scope.trim();
            if scope.is_empty() {
                return Err(AttributeMapError::EmptyField {
                    index,
                    field: "scope",
                });
            }
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(AttributeMapError::EmptyField {
                    index,
                    field: "name",
                });
            }
            let path = DocumentPath::parse(entry.sub_doc_path.trim()).ok_or_else(|| {
                AttributeMapError::InvalidPath {
                    index,
                    path: entry.sub_doc_path.clone(),
                }
            })?;

            scopes
                .entry(scope.to_string())
                .or_default()
                .paths
                .insert(name.to_string(), path);
        }

        Ok(Self { scopes })
    }

    pub fn from_json(raw: &str) -> Result<Self, AttributeMapError> {
        let entries: Vec<AttributeMappingEntry> =
            serde_json::from_str(raw).map_err(AttributeMapError::Parse)?;
        Self::from_entries(entries)
    }

    pub fn table(&self, entity_type: &str) -> Option<&FqnTable> {
        self.scopes.get(entity_type)
    }

    pub fn resolve(&self, entity_type: &str, fqn: &str) -> Option<&DocumentPath> {
        self.table(entity_type)?.resolve(fqn)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }
}
