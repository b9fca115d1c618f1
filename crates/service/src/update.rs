//! Validation and per-id application of entity updates.

use eqs_contracts::codec;
use eqs_contracts::query::{EntityUpdateRequest, SetAttribute, UpdateOperation};
use eqs_contracts::{AttributeScalar, AttributeValue};
use eqs_docstore::{Collection, Document, Key};

use crate::ServiceError;
use crate::attribute_map::{AttributeMap, DocumentPath, FqnTable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub updated: Vec<String>,
    /// Ids the store reported as not updated.
    pub failed: Vec<String>,
}

/// Checks the request preconditions in order and returns the operation.
pub fn validate<'a>(
    request: &'a EntityUpdateRequest,
    attribute_map: &'a AttributeMap,
) -> Result<(&'a FqnTable, &'a UpdateOperation), ServiceError> {
    if request.entity_type.trim().is_empty() {
        return Err(ServiceError::request_shape(
            "entity type is missing in the request",
        ));
    }
    if request.entity_ids.is_empty() {
        return Err(ServiceError::request_shape(
            "entity ids are missing in the request",
        ));
    }
    let Some(operation) = request.operation.as_ref() else {
        return Err(ServiceError::request_shape(
            "operation is missing in the request",
        ));
    };
    let table = attribute_map.table(&request.entity_type).ok_or_else(|| {
        ServiceError::request_shape(format!("unknown entity type `{}`", request.entity_type))
    })?;
    Ok((table, operation))
}

/// Applies the validated operation to every id in request order.
///
/// A store that reports an id as not updated is logged and skipped; a store
/// error aborts the remaining ids.
pub async fn apply(
    request: &EntityUpdateRequest,
    attribute_map: &AttributeMap,
    tenant_id: &str,
    collection: &dyn Collection,
) -> Result<UpdateOutcome, ServiceError> {
    let (table, operation) = validate(request, attribute_map)?;

    match operation {
        UpdateOperation::SetAttribute(set_attribute) => {
            let (sub_doc_path, sub_document) = resolve_set_attribute(set_attribute, table)?;
            set_sub_document(
                request,
                tenant_id,
                collection,
                &sub_doc_path,
                sub_document,
            )
            .await
        }
    }
}

fn resolve_set_attribute(
    set_attribute: &SetAttribute,
    table: &FqnTable,
) -> Result<(String, Document), ServiceError> {
    let fqn = &set_attribute.attribute.column_name;
    let path = table
        .resolve(fqn)
        .ok_or_else(|| ServiceError::request_shape(format!("unknown attribute FQN `{}`", fqn)))?;

    match path {
        DocumentPath::EntityId => Err(ServiceError::request_shape(format!(
            "`{}` maps to the entity id, which cannot be updated",
            fqn
        ))),
        DocumentPath::EntityName => match &set_attribute.value {
            AttributeValue::Value(AttributeScalar::String(name)) => {
                Ok((path.sub_doc_path(), Document::String(name.clone())))
            }
            _ => Err(ServiceError::request_shape(format!(
                "`{}` maps to the entity name and only accepts a string value",
                fqn
            ))),
        },
        DocumentPath::Attribute(_) => Ok((
            path.sub_doc_path(),
            codec::encode_attribute_value(&set_attribute.value)?,
        )),
    }
}

async fn set_sub_document(
    request: &EntityUpdateRequest,
    tenant_id: &str,
    collection: &dyn Collection,
    sub_doc_path: &str,
    sub_document: Document,
) -> Result<UpdateOutcome, ServiceError> {
    let mut outcome = UpdateOutcome::default();

    for entity_id in &request.entity_ids {
        let key = Key::new(tenant_id, entity_id.as_str());
        let updated = collection
            .update_sub_doc(&key, sub_doc_path, sub_document.clone())
            .await
            .map_err(|err| ServiceError::storage(err, serde_json::to_value(request).ok()))?;

        if updated {
            outcome.updated.push(entity_id.clone());
        } else {
            tracing::warn!(
                key = %key,
                sub_doc_path,
                value = %sub_document,
                "failed to update entity sub-document"
            );
            crate::metrics::inc_update_failure(&request.entity_type);
            outcome.failed.push(entity_id.clone());
        }
    }

    Ok(outcome)
}
