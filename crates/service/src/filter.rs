//! Translation of column-oriented query requests into tenant-scoped store queries.
//!
//! Attribute columns compare against the typed scalar slot of the stored
//! attribute value, `attributes.<key>.value.<kind>`, where the kind comes from
//! the literal being compared. Sentinel columns compare the top-level field.

use eqs_contracts::query::{
    EntityQueryRequest, Expression, Filter as RequestFilter, Operator, OrderByExpression,
    SortOrder, Value,
};
use eqs_contracts::{ENTITY_ID_PATH, ENTITY_TYPE_FIELD, TENANT_ID_FIELD};
use eqs_docstore::{Filter, FilterOp, OrderBy, Query};
use regex::RegexBuilder;

use crate::ServiceError;
use crate::attribute_map::{DocumentPath, FqnTable};

/// Builds the store query for `request`, scoped to `tenant_id` and the
/// request's entity type regardless of what the caller's filter says.
pub fn translate_query(
    request: &EntityQueryRequest,
    table: &FqnTable,
    tenant_id: &str,
) -> Result<Query, ServiceError> {
    let mut clauses = vec![
        Filter::eq(TENANT_ID_FIELD, tenant_id),
        Filter::eq(ENTITY_TYPE_FIELD, request.entity_type.as_str()),
    ];
    if let Some(filter) = &request.filter
        && let Some(translated) = translate_filter(filter, table)?
    {
        clauses.push(translated);
    }

    let order_by = request
        .order_by
        .iter()
        .map(|order| translate_order_by(order, table))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Query {
        filter: Some(Filter::and(clauses)),
        order_by,
        limit: request.limit,
        offset: request.offset,
    })
}

/// Query that re-reads the given entity ids of one tenant.
pub fn id_list_query(tenant_id: &str, entity_ids: &[String]) -> Query {
    Query::with_filter(Filter::and(vec![
        Filter::eq(TENANT_ID_FIELD, tenant_id),
        Filter::new(
            FilterOp::In,
            ENTITY_ID_PATH,
            serde_json::Value::from(entity_ids.to_vec()),
        ),
    ]))
}

/// Returns `None` for composites that end up with no children.
pub fn translate_filter(
    filter: &RequestFilter,
    table: &FqnTable,
) -> Result<Option<Filter>, ServiceError> {
    let op = match filter.operator {
        Operator::And | Operator::Or => return translate_composite(filter, table),
        Operator::Eq => FilterOp::Eq,
        Operator::Neq => FilterOp::Neq,
        Operator::In => FilterOp::In,
        Operator::NotIn => FilterOp::NotIn,
        Operator::Gt => FilterOp::Gt,
        Operator::Lt => FilterOp::Lt,
        Operator::Ge => FilterOp::Gte,
        Operator::Le => FilterOp::Lte,
        Operator::Like => FilterOp::Like,
        Operator::Exists => FilterOp::Exists,
        Operator::NotExists => FilterOp::NotExists,
    };

    let column = filter
        .lhs
        .as_ref()
        .and_then(Expression::as_column)
        .ok_or_else(|| {
            ServiceError::request_shape(format!(
                "{} filter requires a column on the left-hand side",
                filter.operator.as_str()
            ))
        })?;
    let path = resolve_column(table, &column.column_name)?;

    if matches!(op, FilterOp::Exists | FilterOp::NotExists) {
        return Ok(Some(Filter::new(
            op,
            path.sub_doc_path(),
            serde_json::Value::Null,
        )));
    }

    let literal = match &filter.rhs {
        Some(Expression::Literal(literal)) => &literal.value,
        _ => {
            return Err(ServiceError::request_shape(format!(
                "{} filter on `{}` requires a literal on the right-hand side",
                filter.operator.as_str(),
                column.column_name
            )));
        }
    };

    let (value, kind, is_array) = literal_to_json(literal).ok_or_else(|| {
        ServiceError::request_shape(format!(
            "{} literal cannot be compared with `{}`",
            literal.value_type(),
            column.column_name
        ))
    })?;

    match op {
        FilterOp::In | FilterOp::NotIn if !is_array => {
            return Err(ServiceError::request_shape(format!(
                "{} on `{}` requires an array literal",
                filter.operator.as_str(),
                column.column_name
            )));
        }
        FilterOp::In | FilterOp::NotIn => {}
        _ if is_array => {
            return Err(ServiceError::request_shape(format!(
                "{} on `{}` requires a scalar literal",
                filter.operator.as_str(),
                column.column_name
            )));
        }
        FilterOp::Like if kind != "string" => {
            return Err(ServiceError::request_shape(format!(
                "LIKE on `{}` requires a string pattern",
                column.column_name
            )));
        }
        FilterOp::Like => {
            let pattern = value.as_str().unwrap_or_default();
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|err| {
                    ServiceError::request_shape(format!(
                        "invalid LIKE pattern for `{}`: {}",
                        column.column_name, err
                    ))
                })?;
        }
        _ => {}
    }

    let field_name = match path {
        DocumentPath::EntityId | DocumentPath::EntityName => {
            if kind != "string" {
                return Err(ServiceError::request_shape(format!(
                    "`{}` only compares with string literals",
                    column.column_name
                )));
            }
            path.sub_doc_path()
        }
        DocumentPath::Attribute(_) => format!("{}.value.{}", path.sub_doc_path(), kind),
    };

    Ok(Some(Filter::new(op, field_name, value)))
}

fn translate_composite(
    filter: &RequestFilter,
    table: &FqnTable,
) -> Result<Option<Filter>, ServiceError> {
    let mut children = Vec::with_capacity(filter.child_filter.len());
    for child in &filter.child_filter {
        if let Some(translated) = translate_filter(child, table)? {
            children.push(translated);
        }
    }

    Ok(match children.len() {
        0 => None,
        1 => children.pop(),
        _ if filter.operator == Operator::And => Some(Filter::and(children)),
        _ => Some(Filter::or(children)),
    })
}

fn translate_order_by(order: &OrderByExpression, table: &FqnTable) -> Result<OrderBy, ServiceError> {
    let column = order.expression.as_column().ok_or_else(|| {
        ServiceError::request_shape("order_by expressions must be column identifiers")
    })?;
    let field = match resolve_column(table, &column.column_name)? {
        DocumentPath::Attribute(key) => format!("attributes.{}.value", key),
        sentinel => sentinel.sub_doc_path(),
    };
    Ok(OrderBy {
        field,
        is_asc: order.order == SortOrder::Asc,
    })
}

fn resolve_column<'a>(table: &'a FqnTable, column_name: &str) -> Result<&'a DocumentPath, ServiceError> {
    table.resolve(column_name).ok_or_else(|| {
        ServiceError::request_shape(format!("unknown column `{}`", column_name))
    })
}

/// JSON form of a literal plus the attribute scalar kind it compares with.
fn literal_to_json(value: &Value) -> Option<(serde_json::Value, &'static str, bool)> {
    let converted = match value {
        Value::Null | Value::StringMap(_) => return None,
        Value::String(v) => (serde_json::json!(v), "string", false),
        Value::Bytes(v) => (serde_json::json!(v), "bytes", false),
        Value::Bool(v) => (serde_json::json!(v), "boolean", false),
        Value::Int(v) => (serde_json::json!(v), "int", false),
        Value::Long(v) => (serde_json::json!(v), "long", false),
        Value::Float(v) => (serde_json::json!(v), "float", false),
        Value::Double(v) => (serde_json::json!(v), "double", false),
        Value::Timestamp(v) => (serde_json::json!(v), "timestamp", false),
        Value::StringArray(v) => (serde_json::json!(v), "string", true),
        Value::BytesArray(v) => (serde_json::json!(v), "bytes", true),
        Value::BooleanArray(v) => (serde_json::json!(v), "boolean", true),
        Value::IntArray(v) => (serde_json::json!(v), "int", true),
        Value::LongArray(v) => (serde_json::json!(v), "long", true),
        Value::FloatArray(v) => (serde_json::json!(v), "float", true),
        Value::DoubleArray(v) => (serde_json::json!(v), "double", true),
        Value::TimestampArray(v) => (serde_json::json!(v), "timestamp", true),
    };
    Some(converted)
}
