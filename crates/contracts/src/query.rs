use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::AttributeValue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIdentifier {
    pub column_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ColumnIdentifier {
    pub fn new(column_name: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            alias: None,
        }
    }
}

/// Typed cell value returned in result rows and used for filter literals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Value {
    #[default]
    Null,
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Timestamp(i64),
    StringArray(Vec<String>),
    BytesArray(Vec<Vec<u8>>),
    BooleanArray(Vec<bool>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    TimestampArray(Vec<i64>),
    StringMap(BTreeMap<String, String>),
}

impl Value {
    pub fn value_type(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::Bool(_) => "BOOL",
            Value::Int(_) => "INT",
            Value::Long(_) => "LONG",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::StringArray(_) => "STRING_ARRAY",
            Value::BytesArray(_) => "BYTES_ARRAY",
            Value::BooleanArray(_) => "BOOLEAN_ARRAY",
            Value::IntArray(_) => "INT_ARRAY",
            Value::LongArray(_) => "LONG_ARRAY",
            Value::FloatArray(_) => "FLOAT_ARRAY",
            Value::DoubleArray(_) => "DOUBLE_ARRAY",
            Value::TimestampArray(_) => "TIMESTAMP_ARRAY",
            Value::StringMap(_) => "STRING_MAP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralConstant {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub function_name: String,
    #[serde(default)]
    pub arguments: Vec<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    ColumnIdentifier(ColumnIdentifier),
    Literal(LiteralConstant),
    Function(Function),
}

impl Expression {
    pub fn column(column_name: impl Into<String>) -> Self {
        Expression::ColumnIdentifier(ColumnIdentifier::new(column_name))
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(LiteralConstant { value })
    }

    pub fn as_column(&self) -> Option<&ColumnIdentifier> {
        match self {
            Expression::ColumnIdentifier(column) => Some(column),
            Expression::Literal(_) | Expression::Function(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    And,
    Or,
    Eq,
    Neq,
    In,
    NotIn,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    Exists,
    NotExists,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Eq => "EQ",
            Operator::Neq => "NEQ",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::Gt => "GT",
            Operator::Lt => "LT",
            Operator::Ge => "GE",
            Operator::Le => "LE",
            Operator::Like => "LIKE",
            Operator::Exists => "EXISTS",
            Operator::NotExists => "NOT_EXISTS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lhs: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs: Option<Expression>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_filter: Vec<Filter>,
}

impl Filter {
    pub fn compare(operator: Operator, column_name: &str, value: Value) -> Self {
        Self {
            operator,
            lhs: Some(Expression::column(column_name)),
            rhs: Some(Expression::literal(value)),
            child_filter: Vec::new(),
        }
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Self {
            operator: Operator::And,
            lhs: None,
            rhs: None,
            child_filter: children,
        }
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Self {
            operator: Operator::Or,
            lhs: None,
            rhs: None,
            child_filter: children,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByExpression {
    pub expression: Expression,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityQueryRequest {
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub selection: Vec<Expression>,
    #[serde(default)]
    pub order_by: Vec<OrderByExpression>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAttribute {
    pub attribute: ColumnIdentifier,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOperation {
    SetAttribute(SetAttribute),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityUpdateRequest {
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub operation: Option<UpdateOperation>,
    #[serde(default)]
    pub selection: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetMetadata {
    pub column_metadata: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub column: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSetChunk {
    pub result_set_metadata: ResultSetMetadata,
    pub row: Vec<Row>,
}
