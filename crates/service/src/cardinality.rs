//! Decoding of search results and the point-lookup cardinality policy.

use std::fmt::Debug;

use eqs_contracts::codec::{self, CodecError};
use eqs_contracts::{Entity, EntityLabel};
use eqs_docstore::{DOCUMENT_KEY_FIELD, Document, Filter, Key, Query, TENANT_FIELD};

use crate::ServiceError;

/// A message type that can be read back from a stored document.
pub trait StoredMessage: Default + Debug + Sized {
    fn decode(document: &Document) -> Result<Self, CodecError>;
}

impl StoredMessage for Entity {
    fn decode(document: &Document) -> Result<Self, CodecError> {
        codec::decode_document(document)
    }
}

impl StoredMessage for EntityLabel {
    fn decode(document: &Document) -> Result<Self, CodecError> {
        codec::decode_document(document)
    }
}

/// Store query matching the single document stored under `key` for the
/// key's own tenant.
pub fn point_lookup_query(key: &Key) -> Query {
    Query::with_filter(Filter::and(vec![
        Filter::eq(DOCUMENT_KEY_FIELD, key.to_string()),
        Filter::eq(TENANT_FIELD, key.tenant_id.as_str()),
    ]))
}

/// Decodes every document, logging and dropping the ones that do not decode.
pub fn decode_all<T: StoredMessage>(collection: &str, documents: &[Document]) -> Vec<T> {
    documents
        .iter()
        .filter_map(|document| match T::decode(document) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::error!(
                    collection,
                    document_key = document
                        .get(DOCUMENT_KEY_FIELD)
                        .and_then(|v| v.as_str())
                        .unwrap_or(""),
                    error = %err,
                    "dropping document that failed to decode"
                );
                crate::metrics::inc_document_decode_failure(collection);
                None
            }
        })
        .collect()
}

/// Exactly one match is returned as is, no match yields the default message
/// and several matches are an error.
pub fn resolve_one<T: StoredMessage>(
    collection: &str,
    key: &Key,
    mut matches: Vec<T>,
) -> Result<T, ServiceError> {
    tracing::debug!(collection, key = %key, result = ?matches, "point lookup result");

    match matches.len() {
        0 => Ok(T::default()),
        1 => Ok(matches.remove(0)),
        _ => Err(ServiceError::AmbiguousKey {
            collection: collection.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Every decodable match, in store order.
pub fn resolve_all<T: StoredMessage>(collection: &str, documents: &[Document]) -> Vec<T> {
    decode_all(collection, documents)
}
