//! Conversion between stored JSON documents and typed messages.
//!
//! Decoding ignores fields the target message does not know about, so
//! documents written by newer producers (or carrying store bookkeeping such as
//! `_id`) still decode.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::AttributeValue;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("failed to decode document: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

pub fn decode_document<T: DeserializeOwned>(document: &serde_json::Value) -> Result<T, CodecError> {
    if !document.is_object() {
        return Err(CodecError::NotAnObject);
    }
    T::deserialize(document).map_err(CodecError::Decode)
}

pub fn encode_message<T: Serialize>(message: &T) -> Result<serde_json::Value, CodecError> {
    let value = serde_json::to_value(message).map_err(CodecError::Encode)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }
    Ok(value)
}

/// Document form of a single attribute value, as written into a sub-document.
pub fn encode_attribute_value(value: &AttributeValue) -> Result<serde_json::Value, CodecError> {
    serde_json::to_value(value).map_err(CodecError::Encode)
}
