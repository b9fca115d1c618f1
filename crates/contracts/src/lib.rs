use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod query;

/// Sub-document path holding the entity identifier.
pub const ENTITY_ID_PATH: &str = "entity_id";
/// Sub-document path holding the entity display name.
pub const ENTITY_NAME_PATH: &str = "entity_name";
pub const ENTITY_TYPE_FIELD: &str = "entity_type";
pub const TENANT_ID_FIELD: &str = "tenant_id";
pub const ATTRIBUTES_PREFIX: &str = "attributes.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeScalar {
    String(String),
    Bytes(Vec<u8>),
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Timestamp(i64),
}

impl AttributeScalar {
    /// Name of the document slot this scalar is stored under.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeScalar::String(_) => "string",
            AttributeScalar::Bytes(_) => "bytes",
            AttributeScalar::Boolean(_) => "boolean",
            AttributeScalar::Int(_) => "int",
            AttributeScalar::Long(_) => "long",
            AttributeScalar::Float(_) => "float",
            AttributeScalar::Double(_) => "double",
            AttributeScalar::Timestamp(_) => "timestamp",
        }
    }
}

/// Typed value stored in an entity's attribute bag.
///
/// The externally tagged serde form is also the stored document form, e.g.
/// `{"value": {"string": "checkout"}}`, so a scalar lives at
/// `attributes.<key>.value.<kind>` inside the entity document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Value(AttributeScalar),
    ValueList(Vec<AttributeValue>),
    ValueMap(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue::Value(AttributeScalar::String(value.into()))
    }

    pub fn long(value: i64) -> Self {
        AttributeValue::Value(AttributeScalar::Long(value))
    }

    pub fn boolean(value: bool) -> Self {
        AttributeValue::Value(AttributeScalar::Boolean(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entity {
    pub tenant_id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub entity_name: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityLabel {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}
