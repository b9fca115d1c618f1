//! Projection of decoded entities into column-ordered result rows.

use std::collections::BTreeMap;

use eqs_contracts::query::{
    ColumnIdentifier, ColumnMetadata, Expression, ResultSetChunk, ResultSetMetadata, Row, Value,
};
use eqs_contracts::{AttributeScalar, AttributeValue, Entity};

use crate::attribute_map::{DocumentPath, FqnTable};

/// Builds one chunk whose metadata and rows follow `selection` order.
///
/// Only column selections produce output; literal and function expressions
/// are skipped so every row stays as long as the metadata header.
pub fn project(entities: &[Entity], selection: &[Expression], table: &FqnTable) -> ResultSetChunk {
    let columns: Vec<&ColumnIdentifier> = selection.iter().filter_map(Expression::as_column).collect();

    let result_set_metadata = ResultSetMetadata {
        column_metadata: columns
            .iter()
            .map(|column| ColumnMetadata {
                column_name: column.column_name.clone(),
            })
            .collect(),
    };

    let row = entities
        .iter()
        .map(|entity| project_row(entity, &columns, table))
        .collect();

    ResultSetChunk {
        result_set_metadata,
        row,
    }
}

fn project_row(entity: &Entity, columns: &[&ColumnIdentifier], table: &FqnTable) -> Row {
    let column = columns
        .iter()
        .map(|column| project_column(entity, &column.column_name, table))
        .collect();
    Row { column }
}

fn project_column(entity: &Entity, column_name: &str, table: &FqnTable) -> Value {
    let Some(path) = table.resolve(column_name) else {
        tracing::warn!(
            column_name,
            entity_type = %entity.entity_type,
            "column is not mapped for entity type"
        );
        return Value::default();
    };

    match path {
        DocumentPath::EntityId => Value::String(entity.entity_id.clone()),
        DocumentPath::EntityName => Value::String(entity.entity_name.clone()),
        DocumentPath::Attribute(key) => {
            let Some(attribute) = entity.attributes.get(key) else {
                tracing::warn!(
                    column_name,
                    attribute_key = %key,
                    entity_id = %entity.entity_id,
                    "attribute missing on entity"
                );
                return Value::default();
            };
            attribute_value_to_value(attribute).unwrap_or_else(|| {
                tracing::warn!(
                    column_name,
                    attribute_key = %key,
                    entity_id = %entity.entity_id,
                    "attribute value has no column representation"
                );
                Value::default()
            })
        }
    }
}

/// Converts a stored attribute value into a result cell.
///
/// Scalars keep their kind; lists must hold scalars of one kind and maps must
/// hold string scalars. Anything else has no lossless cell form.
pub fn attribute_value_to_value(attribute: &AttributeValue) -> Option<Value> {
    match attribute {
        AttributeValue::Value(scalar) => Some(scalar_to_value(scalar)),
        AttributeValue::ValueList(items) => list_to_value(items),
        AttributeValue::ValueMap(entries) => map_to_value(entries),
    }
}

fn scalar_to_value(scalar: &AttributeScalar) -> Value {
    match scalar {
        AttributeScalar::String(v) => Value::String(v.clone()),
        AttributeScalar::Bytes(v) => Value::Bytes(v.clone()),
        AttributeScalar::Boolean(v) => Value::Bool(*v),
        AttributeScalar::Int(v) => Value::Int(*v),
        AttributeScalar::Long(v) => Value::Long(*v),
        AttributeScalar::Float(v) => Value::Float(*v),
        AttributeScalar::Double(v) => Value::Double(*v),
        AttributeScalar::Timestamp(v) => Value::Timestamp(*v),
    }
}

fn list_to_value(items: &[AttributeValue]) -> Option<Value> {
    let scalars = items
        .iter()
        .map(|item| match item {
            AttributeValue::Value(scalar) => Some(scalar),
            AttributeValue::ValueList(_) | AttributeValue::ValueMap(_) => None,
        })
        .collect::<Option<Vec<_>>>()?;

    // An empty list carries no element kind; report it as an empty string array.
    let Some(first) = scalars.first() else {
        return Some(Value::StringArray(Vec::new()));
    };

    macro_rules! collect_kind {
        ($scalar:ident, $array:ident, $conv:expr) => {
            scalars
                .iter()
                .map(|scalar| match scalar {
                    AttributeScalar::$scalar(v) => Some($conv(v)),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::$array)
        };
    }

    match first {
        AttributeScalar::String(_) => collect_kind!(String, StringArray, |v: &String| v.clone()),
        AttributeScalar::Bytes(_) => collect_kind!(Bytes, BytesArray, |v: &Vec<u8>| v.clone()),
        AttributeScalar::Boolean(_) => collect_kind!(Boolean, BooleanArray, |v: &bool| *v),
        AttributeScalar::Int(_) => collect_kind!(Int, IntArray, |v: &i32| *v),
        AttributeScalar::Long(_) => collect_kind!(Long, LongArray, |v: &i64| *v),
        AttributeScalar::Float(_) => collect_kind!(Float, FloatArray, |v: &f32| *v),
        AttributeScalar::Double(_) => collect_kind!(Double, DoubleArray, |v: &f64| *v),
        AttributeScalar::Timestamp(_) => collect_kind!(Timestamp, TimestampArray, |v: &i64| *v),
    }
}

fn map_to_value(entries: &BTreeMap<String, AttributeValue>) -> Option<Value> {
    entries
        .iter()
        .map(|(key, value)| match value {
            AttributeValue::Value(AttributeScalar::String(v)) => Some((key.clone(), v.clone())),
            _ => None,
        })
        .collect::<Option<BTreeMap<_, _>>>()
        .map(Value::StringMap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_map::{AttributeMap, AttributeMappingEntry};
    use eqs_contracts::query::{Function, LiteralConstant};

    fn api_map() -> AttributeMap {
        AttributeMap::from_entries(
            [
                ("id", "entity_id"),
                ("name", "entity_name"),
                ("apiName", "attributes.api_name"),
                ("tags", "attributes.tags"),
                ("labels", "attributes.labels"),
            ]
            .map(|(name, path)| AttributeMappingEntry {
                scope: "API".to_string(),
                name: name.to_string(),
                sub_doc_path: path.to_string(),
            }),
        )
        .unwrap()
    }

    fn checkout() -> Entity {
        let mut entity = Entity {
            tenant_id: "t1".to_string(),
            entity_id: "e1".to_string(),
            entity_type: "API".to_string(),
            entity_name: "checkout-api".to_string(),
            ..Default::default()
        };
        entity
            .attributes
            .insert("api_name".to_string(), AttributeValue::string("checkout"));
        entity
    }

    #[test]
    fn projects_columns_in_selection_order() {
        let map = api_map();
        let chunk = project(
            &[checkout()],
            &[Expression::column("apiName"), Expression::column("id")],
            map.table("API").unwrap(),
        );

        assert_eq!(
            chunk
                .result_set_metadata
                .column_metadata
                .iter()
                .map(|c| c.column_name.as_str())
                .collect::<Vec<_>>(),
            vec!["apiName", "id"]
        );
        assert_eq!(
            chunk.row,
            vec![Row {
                column: vec![
                    Value::String("checkout".to_string()),
                    Value::String("e1".to_string()),
                ],
            }]
        );
    }

    #[test]
    fn unresolvable_columns_yield_null_and_keep_row_length() {
        let map = api_map();
        let selection = [
            Expression::column("unknown"),
            Expression::column("tags"),
            Expression::column("name"),
            Expression::literal(Value::Long(7)),
            Expression::Function(Function {
                function_name: "COUNT".to_string(),
                arguments: vec![Expression::column("id")],
                alias: None,
            }),
        ];
        let chunk = project(&[checkout(), Entity::default()], &selection, map.table("API").unwrap());

        assert_eq!(chunk.result_set_metadata.column_metadata.len(), 3);
        for row in &chunk.row {
            assert_eq!(row.column.len(), 3);
            assert_eq!(row.column[0], Value::Null);
            assert_eq!(row.column[1], Value::Null);
        }
        assert_eq!(chunk.row[0].column[2], Value::String("checkout-api".to_string()));
        assert_eq!(chunk.row[1].column[2], Value::String(String::new()));
    }

    #[test]
    fn column_values_do_not_depend_on_other_columns() {
        let map = api_map();
        let table = map.table("API").unwrap();
        let alone = project(&[checkout()], &[Expression::column("apiName")], table);
        let mixed = project(
            &[checkout()],
            &[
                Expression::column("missing"),
                Expression::column("apiName"),
                Expression::Literal(LiteralConstant { value: Value::Null }),
            ],
            table,
        );
        assert_eq!(alone.row[0].column[0], mixed.row[0].column[1]);
    }

    #[test]
    fn homogeneous_lists_and_string_maps_convert() {
        assert_eq!(
            attribute_value_to_value(&AttributeValue::ValueList(vec![
                AttributeValue::long(1),
                AttributeValue::long(2),
            ])),
            Some(Value::LongArray(vec![1, 2]))
        );
        assert_eq!(
            attribute_value_to_value(&AttributeValue::ValueMap(BTreeMap::from([(
                "env".to_string(),
                AttributeValue::string("prod"),
            )]))),
            Some(Value::StringMap(BTreeMap::from([(
                "env".to_string(),
                "prod".to_string()
            )])))
        );
        assert_eq!(
            attribute_value_to_value(&AttributeValue::ValueList(Vec::new())),
            Some(Value::StringArray(Vec::new()))
        );
    }

    #[test]
    fn lossy_values_have_no_cell_form() {
        assert_eq!(
            attribute_value_to_value(&AttributeValue::ValueList(vec![
                AttributeValue::long(1),
                AttributeValue::string("two"),
            ])),
            None
        );
        assert_eq!(
            attribute_value_to_value(&AttributeValue::ValueMap(BTreeMap::from([(
                "n".to_string(),
                AttributeValue::long(1),
            )]))),
            None
        );
        assert_eq!(
            attribute_value_to_value(&AttributeValue::ValueList(vec![AttributeValue::ValueList(
                Vec::new()
            )])),
            None
        );
    }

    #[test]
    fn lossy_attribute_projects_as_null() {
        let map = api_map();
        let mut entity = checkout();
        entity.attributes.insert(
            "labels".to_string(),
            AttributeValue::ValueList(vec![AttributeValue::long(1), AttributeValue::boolean(true)]),
        );
        let chunk = project(&[entity], &[Expression::column("labels")], map.table("API").unwrap());
        assert_eq!(chunk.row[0].column, vec![Value::Null]);
    }
}
