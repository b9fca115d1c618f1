use std::sync::Arc;

use eqs_contracts::codec;
use eqs_contracts::query::{EntityQueryRequest, EntityUpdateRequest, ResultSetChunk};
use eqs_contracts::{Entity, EntityLabel, TENANT_ID_FIELD};
use eqs_docstore::{Collection, Datastore, Filter, Key, Query, StoreError};
use ulid::Ulid;

use crate::ServiceError;
use crate::attribute_map::AttributeMap;
use crate::cardinality::{self, point_lookup_query};
use crate::{filter, projection, update};

/// Caller identity for one request. The tenant never comes from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: Option<String>,
    request_id: String,
}

impl RequestContext {
    pub fn new(tenant_id: Option<String>, request_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            request_id: request_id.into(),
        }
    }

    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self::new(Some(tenant_id.into()), Ulid::new().to_string())
    }

    pub fn tenant_id(&self) -> Result<&str, ServiceError> {
        self.tenant_id.as_deref().ok_or(ServiceError::MissingTenant)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Clone)]
pub struct EntityQueryService {
    attribute_map: Arc<AttributeMap>,
    entities: Arc<dyn Collection>,
    labels: Arc<dyn Collection>,
}

impl EntityQueryService {
    pub fn new(
        attribute_map: Arc<AttributeMap>,
        entities: Arc<dyn Collection>,
        labels: Arc<dyn Collection>,
    ) -> Self {
        Self {
            attribute_map,
            entities,
            labels,
        }
    }

    pub async fn open(
        datastore: &dyn Datastore,
        attribute_map: Arc<AttributeMap>,
        entities_collection: &str,
        labels_collection: &str,
    ) -> Result<Self, StoreError> {
        let entities = datastore.collection(entities_collection).await?;
        let labels = datastore.collection(labels_collection).await?;
        Ok(Self::new(attribute_map, entities, labels))
    }

    pub fn attribute_map(&self) -> &AttributeMap {
        &self.attribute_map
    }

    pub async fn execute_query(
        &self,
        ctx: &RequestContext,
        request: EntityQueryRequest,
    ) -> Result<ResultSetChunk, ServiceError> {
        let tenant_id = ctx.tenant_id()?;
        let table = self.attribute_map.table(&request.entity_type).ok_or_else(|| {
            ServiceError::request_shape(format!("unknown entity type `{}`", request.entity_type))
        })?;

        let query = filter::translate_query(&request, table, tenant_id)?;
        let entities = self.search_entities(&query, &request).await?;

        Ok(projection::project(&entities, &request.selection, table))
    }

    pub async fn execute_update(
        &self,
        ctx: &RequestContext,
        request: EntityUpdateRequest,
    ) -> Result<ResultSetChunk, ServiceError> {
        let tenant_id = ctx.tenant_id()?;

        let outcome =
            update::apply(&request, &self.attribute_map, tenant_id, self.entities.as_ref()).await?;
        tracing::info!(
            entity_type = %request.entity_type,
            updated = outcome.updated.len(),
            failed = outcome.failed.len(),
            "entity update applied"
        );

        let table = self.attribute_map.table(&request.entity_type).ok_or_else(|| {
            ServiceError::request_shape(format!("unknown entity type `{}`", request.entity_type))
        })?;
        let query = filter::id_list_query(tenant_id, &request.entity_ids);
        let entities = self.search_entities(&query, &request).await?;

        Ok(projection::project(&entities, &request.selection, table))
    }

    /// Stores `label` under a freshly generated id for the caller's tenant and
    /// returns what the store now holds for that id.
    pub async fn create_label(
        &self,
        ctx: &RequestContext,
        label: EntityLabel,
    ) -> Result<EntityLabel, ServiceError> {
        let tenant_id = ctx.tenant_id()?;

        let label = EntityLabel {
            id: Ulid::new().to_string(),
            tenant_id: tenant_id.to_string(),
            ..label
        };
        let key = Key::new(tenant_id, label.id.as_str());
        let document = codec::encode_message(&label)?;

        self.labels
            .upsert(&key, document)
            .await
            .map_err(|err| ServiceError::storage(err, serde_json::to_value(&label).ok()))?;

        self.lookup_label(&key).await
    }

    pub async fn get_label_by_id(
        &self,
        ctx: &RequestContext,
        label_id: &str,
    ) -> Result<EntityLabel, ServiceError> {
        let tenant_id = ctx.tenant_id()?;
        self.lookup_label(&Key::new(tenant_id, label_id)).await
    }

    pub async fn list_labels_for_tenant(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<EntityLabel>, ServiceError> {
        let tenant_id = ctx.tenant_id()?;
        let query = Query::with_filter(Filter::eq(TENANT_ID_FIELD, tenant_id));

        let documents = self.labels.search(&query).await.map_err(|err| {
            ServiceError::storage(err, Some(serde_json::json!({ "tenant_id": tenant_id })))
        })?;
        Ok(cardinality::resolve_all(self.labels.name(), &documents))
    }

    async fn lookup_label(&self, key: &Key) -> Result<EntityLabel, ServiceError> {
        let documents = self
            .labels
            .search(&point_lookup_query(key))
            .await
            .map_err(|err| ServiceError::storage(err, Some(serde_json::json!({ "id": key.value }))))?;

        let labels = cardinality::decode_all(self.labels.name(), &documents);
        cardinality::resolve_one(self.labels.name(), key, labels)
    }

    async fn search_entities<R: serde::Serialize>(
        &self,
        query: &Query,
        request: &R,
    ) -> Result<Vec<Entity>, ServiceError> {
        let documents = self
            .entities
            .search(query)
            .await
            .map_err(|err| ServiceError::storage(err, serde_json::to_value(request).ok()))?;
        Ok(cardinality::decode_all(self.entities.name(), &documents))
    }
}
