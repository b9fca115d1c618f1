//! Process-local document store used by tests and the `memory` store mode.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    Collection, Datastore, Document, Filter, FilterOp, Key, OrderBy, Query, StoreError,
    is_valid_collection_name, owned_by, split_path, with_document_key,
};

#[derive(Default)]
pub struct InMemoryDatastore {
    collections: RwLock<BTreeMap<String, Arc<InMemoryCollection>>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        if !is_valid_collection_name(name) {
            return Err(StoreError::InvalidCollectionName(name.to_string()));
        }

        let mut collections = self.collections.write().await;
        let collection: Arc<dyn Collection> = collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryCollection::new(name)))
            .clone();
        Ok(collection)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct InMemoryCollection {
    name: String,
    documents: RwLock<BTreeMap<String, Document>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut matched = Vec::new();
        {
            let documents = self.documents.read().await;
            for document in documents.values() {
                let keep = match &query.filter {
                    None => true,
                    Some(filter) => matches(filter, document)?,
                };
                if keep {
                    matched.push(document.clone());
                }
            }
        }

        if !query.order_by.is_empty() {
            matched.sort_by(|a, b| compare_documents(a, b, &query.order_by));
        }

        let skipped = matched
            .into_iter()
            .skip(query.offset.unwrap_or(0) as usize);
        Ok(match query.limit {
            Some(limit) => skipped.take(limit as usize).collect(),
            None => skipped.collect(),
        })
    }

    async fn upsert(&self, key: &Key, document: Document) -> Result<bool, StoreError> {
        let document = with_document_key(key, document)?;
        let mut documents = self.documents.write().await;
        if let Some(existing) = documents.get(&key.to_string())
            && !owned_by(existing, key)
        {
            return Ok(false);
        }
        documents.insert(key.to_string(), document);
        Ok(true)
    }

    async fn update_sub_doc(
        &self,
        key: &Key,
        sub_doc_path: &str,
        sub_document: Document,
    ) -> Result<bool, StoreError> {
        let segments = split_path(sub_doc_path);
        if segments.is_empty() {
            return Err(StoreError::InvalidDocument(
                "sub-document path must be non-empty".to_string(),
            ));
        }

        let mut documents = self.documents.write().await;
        let Some(document) = documents
            .get_mut(&key.to_string())
            .filter(|document| owned_by(document, key))
        else {
            return Ok(false);
        };
        Ok(set_path(document, &segments, sub_document))
    }
}

pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_path(document: &mut Value, segments: &[String], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = document;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            _ => return false,
        };
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            true
        }
        _ => false,
    }
}

fn matches(filter: &Filter, document: &Value) -> Result<bool, StoreError> {
    match filter.op {
        FilterOp::And => {
            for child in &filter.child_filters {
                if !matches(child, document)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        FilterOp::Or => {
            for child in &filter.child_filters {
                if matches(child, document)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => matches_field(filter, document),
    }
}

fn matches_field(filter: &Filter, document: &Value) -> Result<bool, StoreError> {
    let actual = lookup(document, &filter.field_name).filter(|v| !v.is_null());
    let expected = &filter.value;

    let matched = match filter.op {
        FilterOp::Eq => actual.is_some_and(|a| json_eq(a, expected)),
        FilterOp::Neq => !actual.is_some_and(|a| json_eq(a, expected)),
        FilterOp::In => {
            let candidates = expect_array(filter)?;
            actual.is_some_and(|a| candidates.iter().any(|c| json_eq(a, c)))
        }
        FilterOp::NotIn => {
            let candidates = expect_array(filter)?;
            !actual.is_some_and(|a| candidates.iter().any(|c| json_eq(a, c)))
        }
        FilterOp::Gt => compare_same_kind(actual, expected) == Some(Ordering::Greater),
        FilterOp::Lt => compare_same_kind(actual, expected) == Some(Ordering::Less),
        FilterOp::Gte => matches!(
            compare_same_kind(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lte => matches!(
            compare_same_kind(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Like => {
            let pattern = expected.as_str().ok_or_else(|| {
                StoreError::UnsupportedFilter(format!(
                    "LIKE on `{}` requires a string pattern",
                    filter.field_name
                ))
            })?;
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|err| StoreError::UnsupportedFilter(format!("invalid pattern: {}", err)))?;
            actual
                .and_then(Value::as_str)
                .is_some_and(|s| regex.is_match(s))
        }
        FilterOp::Exists => actual.is_some(),
        FilterOp::NotExists => actual.is_none(),
        FilterOp::And | FilterOp::Or => false,
    };

    Ok(matched)
}

fn expect_array(filter: &Filter) -> Result<&Vec<Value>, StoreError> {
    filter.value.as_array().ok_or_else(|| {
        StoreError::UnsupportedFilter(format!(
            "{} on `{}` requires an array value",
            filter.op.as_str(),
            filter.field_name
        ))
    })
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_same_kind(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_documents(a: &Value, b: &Value, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let ordering = compare_optional(lookup(a, &order.field), lookup(b, &order.field));
        let ordering = if order.is_asc {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_json(a, b),
    }
}

/// Total order: null < bool < number < string < array < object.
fn compare_json(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_json(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let by_len = x.len().cmp(&y.len());
            if by_len != Ordering::Equal {
                return by_len;
            }
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ordering = lk.cmp(rk).then_with(|| compare_json(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        }
        _ => rank(a).cmp(&rank(b)),
    }
}
