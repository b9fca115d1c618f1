use std::sync::Arc;

use async_trait::async_trait;

pub mod memory;
pub mod postgres;

/// Field every stored document carries with its stringified [`Key`].
pub const DOCUMENT_KEY_FIELD: &str = "_id";

/// Field every stored document carries with the tenant of its [`Key`].
///
/// Writes addressed by key only touch documents whose tenant field matches
/// the key's tenant, so two keys that stringify alike never cross tenants.
pub const TENANT_FIELD: &str = "tenant_id";

pub type Document = serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("store sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid collection name `{0}`")]
    InvalidCollectionName(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),
}

/// Composite document key scoped to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub tenant_id: String,
    pub value: String,
}

impl Key {
    pub fn new(tenant_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    And,
    Or,
    Eq,
    Neq,
    In,
    NotIn,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    Exists,
    NotExists,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::And => "AND",
            FilterOp::Or => "OR",
            FilterOp::Eq => "EQ",
            FilterOp::Neq => "NEQ",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT_IN",
            FilterOp::Gt => "GT",
            FilterOp::Lt => "LT",
            FilterOp::Gte => "GTE",
            FilterOp::Lte => "LTE",
            FilterOp::Like => "LIKE",
            FilterOp::Exists => "EXISTS",
            FilterOp::NotExists => "NOT_EXISTS",
        }
    }

    pub fn is_composite(self) -> bool {
        matches!(self, FilterOp::And | FilterOp::Or)
    }
}

/// Store-native predicate over dotted document paths.
///
/// Composite filters (`And`/`Or`) only use `child_filters`; every other
/// operator compares the value found at `field_name` with `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub op: FilterOp,
    pub field_name: String,
    pub value: serde_json::Value,
    pub child_filters: Vec<Filter>,
}

impl Filter {
    pub fn new(op: FilterOp, field_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op,
            field_name: field_name.into(),
            value,
            child_filters: Vec::new(),
        }
    }

    pub fn eq(field_name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::new(FilterOp::Eq, field_name, value.into())
    }

    pub fn and(child_filters: Vec<Filter>) -> Self {
        Self::composite(FilterOp::And, child_filters)
    }

    pub fn or(child_filters: Vec<Filter>) -> Self {
        Self::composite(FilterOp::Or, child_filters)
    }

    fn composite(op: FilterOp, child_filters: Vec<Filter>) -> Self {
        Self {
            op,
            field_name: String::new(),
            value: serde_json::Value::Null,
            child_filters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub is_asc: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }
}

/// A named set of JSON documents addressed by [`Key`].
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Inserts or replaces the whole document stored under `key`.
    async fn upsert(&self, key: &Key, document: Document) -> Result<bool, StoreError>;

    /// Replaces the sub-document at the dotted `sub_doc_path`.
    ///
    /// Returns `Ok(false)` when no document is stored under `key`.
    async fn update_sub_doc(
        &self,
        key: &Key,
        sub_doc_path: &str,
        sub_document: Document,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn is_valid_collection_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 || !bytes[0].is_ascii_lowercase() {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_')
}

/// Copies `document` with the stringified key written into [`DOCUMENT_KEY_FIELD`].
pub(crate) fn with_document_key(key: &Key, document: Document) -> Result<Document, StoreError> {
    let serde_json::Value::Object(mut map) = document else {
        return Err(StoreError::InvalidDocument(format!(
            "document for `{}` must be a JSON object",
            key
        )));
    };
    map.insert(
        DOCUMENT_KEY_FIELD.to_string(),
        serde_json::Value::String(key.to_string()),
    );
    map.insert(
        TENANT_FIELD.to_string(),
        serde_json::Value::String(key.tenant_id.clone()),
    );
    Ok(serde_json::Value::Object(map))
}

pub(crate) fn owned_by(document: &Document, key: &Key) -> bool {
    document.get(TENANT_FIELD).and_then(|v| v.as_str()) == Some(key.tenant_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_stringifies_tenant_first() {
        assert_eq!(Key::new("t1", "e1").to_string(), "t1:e1");
    }

    #[test]
    fn collection_names_are_plain_identifiers() {
        assert!(is_valid_collection_name("raw_entities"));
        assert!(is_valid_collection_name("entity_labels2"));
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("1labels"));
        assert!(!is_valid_collection_name("labels; drop table x"));
        assert!(!is_valid_collection_name("Labels"));
    }

    #[test]
    fn split_path_ignores_empty_segments() {
        assert_eq!(
            split_path("attributes..status.value"),
            vec!["attributes", "status", "value"]
        );
    }

    #[test]
    fn document_key_is_injected_and_non_objects_rejected() {
        let key = Key::new("t1", "e1");
        let doc = with_document_key(&key, serde_json::json!({"entity_id": "e1"})).unwrap();
        assert_eq!(doc[DOCUMENT_KEY_FIELD], "t1:e1");
        assert_eq!(doc[TENANT_FIELD], "t1");
        assert!(owned_by(&doc, &key));
        assert!(!owned_by(&doc, &Key::new("t2", "e1")));

        assert!(matches!(
            with_document_key(&key, serde_json::json!("e1")),
            Err(StoreError::InvalidDocument(_))
        ));
    }
}
