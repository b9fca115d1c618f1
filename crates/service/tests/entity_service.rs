use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use eqs_contracts::codec;
use eqs_contracts::query::{
    ColumnIdentifier, EntityQueryRequest, EntityUpdateRequest, Expression, Filter, Operator,
    OrderByExpression, ResultSetChunk, SetAttribute, SortOrder, UpdateOperation, Value,
};
use eqs_contracts::{AttributeValue, Entity};
use eqs_docstore::memory::InMemoryDatastore;
use eqs_docstore::{Collection, Datastore, Document, Key, Query, StoreError};
use eqs_service::attribute_map::{AttributeMap, AttributeMappingEntry};
use eqs_service::{EntityQueryService, RequestContext, ServiceError};

/// Wraps a collection so chosen ids fail their sub-document updates.
struct FlakyCollection {
    inner: Arc<dyn Collection>,
    rejected_ids: HashSet<String>,
    erroring_ids: HashSet<String>,
    searches: AtomicUsize,
    updates: AtomicUsize,
}

impl FlakyCollection {
    fn new(inner: Arc<dyn Collection>) -> Self {
        Self {
            inner,
            rejected_ids: HashSet::new(),
            erroring_ids: HashSet::new(),
            searches: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Collection for FlakyCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query).await
    }

    async fn upsert(&self, key: &Key, document: Document) -> Result<bool, StoreError> {
        self.inner.upsert(key, document).await
    }

    async fn update_sub_doc(
        &self,
        key: &Key,
        sub_doc_path: &str,
        sub_document: Document,
    ) -> Result<bool, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.erroring_ids.contains(&key.value) {
            return Err(StoreError::Timeout);
        }
        if self.rejected_ids.contains(&key.value) {
            return Ok(false);
        }
        self.inner
            .update_sub_doc(key, sub_doc_path, sub_document)
            .await
    }
}

fn api_map() -> Arc<AttributeMap> {
    let entries = [
        ("id", "entity_id"),
        ("name", "entity_name"),
        ("apiName", "attributes.api_name"),
        ("status", "attributes.status"),
        ("count", "attributes.count"),
    ]
    .map(|(name, path)| AttributeMappingEntry {
        scope: "API".to_string(),
        name: name.to_string(),
        sub_doc_path: path.to_string(),
    });
    Arc::new(AttributeMap::from_entries(entries).expect("attribute map should be valid"))
}

fn entity(tenant: &str, id: &str, api_name: &str, status: &str, count: i64) -> Entity {
    Entity {
        tenant_id: tenant.to_string(),
        entity_id: id.to_string(),
        entity_type: "API".to_string(),
        entity_name: format!("{id}-api"),
        attributes: BTreeMap::from([
            ("api_name".to_string(), AttributeValue::string(api_name)),
            ("status".to_string(), AttributeValue::string(status)),
            ("count".to_string(), AttributeValue::long(count)),
        ]),
    }
}

async fn seed(collection: &dyn Collection, entities: &[Entity]) {
    for entity in entities {
        let document = codec::encode_message(entity).expect("entity should encode");
        collection
            .upsert(&Key::new(&entity.tenant_id, &entity.entity_id), document)
            .await
            .expect("seed upsert should succeed");
    }
}

struct Fixture {
    service: EntityQueryService,
    entities: Arc<FlakyCollection>,
}

async fn fixture(rejected: &[&str], erroring: &[&str]) -> Fixture {
    let store = InMemoryDatastore::new();
    let raw = store
        .collection("raw_entities")
        .await
        .expect("collection should open");
    seed(
        raw.as_ref(),
        &[
            entity("t1", "e1", "checkout", "INACTIVE", 3),
            entity("t1", "e2", "payments", "INACTIVE", 1),
            entity("t1", "e3", "search", "ACTIVE", 2),
            entity("t2", "e1", "checkout", "ACTIVE", 9),
        ],
    )
    .await;

    let mut flaky = FlakyCollection::new(raw);
    flaky.rejected_ids = rejected.iter().map(|id| id.to_string()).collect();
    flaky.erroring_ids = erroring.iter().map(|id| id.to_string()).collect();
    let entities = Arc::new(flaky);

    let labels = store
        .collection("entity_labels")
        .await
        .expect("collection should open");
    let service = EntityQueryService::new(api_map(), entities.clone(), labels);

    Fixture { service, entities }
}

fn columns(names: &[&str]) -> Vec<Expression> {
    names.iter().map(|name| Expression::column(*name)).collect()
}

fn string(value: &str) -> Value {
    Value::String(value.to_string())
}

fn set_status(ids: &[&str], status: &str) -> EntityUpdateRequest {
    EntityUpdateRequest {
        entity_type: "API".to_string(),
        entity_ids: ids.iter().map(|id| id.to_string()).collect(),
        operation: Some(UpdateOperation::SetAttribute(SetAttribute {
            attribute: ColumnIdentifier::new("status"),
            value: AttributeValue::string(status),
        })),
        selection: columns(&["id", "status"]),
    }
}

fn rows(chunk: &ResultSetChunk) -> Vec<Vec<Value>> {
    chunk.row.iter().map(|row| row.column.clone()).collect()
}

#[tokio::test]
async fn query_projects_selected_columns_in_order() {
    let fx = fixture(&[], &[]).await;
    let chunk = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("t1"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                filter: Some(Filter::compare(Operator::Eq, "id", string("e1"))),
                selection: columns(&["apiName", "id"]),
                ..Default::default()
            },
        )
        .await
        .expect("query should succeed");

    assert_eq!(rows(&chunk), vec![vec![string("checkout"), string("e1")]]);
    assert_eq!(chunk.result_set_metadata.column_metadata.len(), 2);
}

#[tokio::test]
async fn query_is_scoped_to_caller_tenant() {
    let fx = fixture(&[], &[]).await;
    let chunk = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("t2"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                selection: columns(&["id", "status"]),
                ..Default::default()
            },
        )
        .await
        .expect("query should succeed");

    assert_eq!(rows(&chunk), vec![vec![string("e1"), string("ACTIVE")]]);
}

#[tokio::test]
async fn query_filters_orders_and_pages() {
    let fx = fixture(&[], &[]).await;
    let chunk = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("t1"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                filter: Some(Filter::or(vec![
                    Filter::compare(Operator::Ge, "count", Value::Long(2)),
                    Filter::compare(Operator::Like, "apiName", string("^pay")),
                ])),
                selection: columns(&["id", "count"]),
                order_by: vec![OrderByExpression {
                    expression: Expression::column("count"),
                    order: SortOrder::Desc,
                }],
                limit: Some(2),
                offset: Some(1),
            },
        )
        .await
        .expect("query should succeed");

    assert_eq!(
        rows(&chunk),
        vec![
            vec![string("e3"), Value::Long(2)],
            vec![string("e2"), Value::Long(1)],
        ]
    );
}

#[tokio::test]
async fn undecodable_documents_are_dropped_from_results() {
    let fx = fixture(&[], &[]).await;
    fx.entities
        .upsert(
            &Key::new("t1", "broken"),
            serde_json::json!({
                "tenant_id": "t1",
                "entity_type": "API",
                "entity_id": 17,
            }),
        )
        .await
        .expect("raw upsert should succeed");

    let chunk = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("t1"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                selection: columns(&["id"]),
                ..Default::default()
            },
        )
        .await
        .expect("query should succeed");

    assert_eq!(
        rows(&chunk),
        vec![vec![string("e1")], vec![string("e2")], vec![string("e3")]]
    );
}

#[tokio::test]
async fn missing_tenant_fails_before_touching_storage() {
    let fx = fixture(&[], &[]).await;
    let ctx = RequestContext::new(None, "req-1");

    let err = fx
        .service
        .execute_query(
            &ctx,
            EntityQueryRequest {
                entity_type: "API".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::MissingTenant));

    let err = fx
        .service
        .execute_update(&ctx, set_status(&["e1"], "ACTIVE"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::MissingTenant));

    assert_eq!(fx.entities.searches.load(Ordering::SeqCst), 0);
    assert_eq!(fx.entities.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_entity_type_and_column_are_request_errors() {
    let fx = fixture(&[], &[]).await;
    let ctx = RequestContext::for_tenant("t1");

    let err = fx
        .service
        .execute_query(
            &ctx,
            EntityQueryRequest {
                entity_type: "BACKEND".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::RequestShape(_)));

    let err = fx
        .service
        .execute_query(
            &ctx,
            EntityQueryRequest {
                entity_type: "API".to_string(),
                filter: Some(Filter::compare(Operator::Eq, "owner", string("x"))),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::RequestShape(_)));
    assert_eq!(fx.entities.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_update_for_one_id_does_not_abort_batch() {
    let fx = fixture(&["e2"], &[]).await;
    let chunk = fx
        .service
        .execute_update(
            &RequestContext::for_tenant("t1"),
            set_status(&["e1", "e2"], "ACTIVE"),
        )
        .await
        .expect("update should succeed despite a per-id failure");

    assert_eq!(
        rows(&chunk),
        vec![
            vec![string("e1"), string("ACTIVE")],
            vec![string("e2"), string("INACTIVE")],
        ]
    );
    assert_eq!(fx.entities.updates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn store_error_aborts_update_with_request_detail() {
    let fx = fixture(&[], &["e1"]).await;
    let err = fx
        .service
        .execute_update(
            &RequestContext::for_tenant("t1"),
            set_status(&["e1", "e2"], "ACTIVE"),
        )
        .await
        .unwrap_err();

    let ServiceError::Storage { detail, .. } = err else {
        panic!("expected storage error, got {err:?}");
    };
    let detail = detail.expect("storage error should carry the request");
    assert_eq!(detail["entity_ids"], serde_json::json!(["e1", "e2"]));
    assert_eq!(fx.entities.updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn setting_the_same_value_twice_is_idempotent() {
    let fx = fixture(&[], &[]).await;
    let ctx = RequestContext::for_tenant("t1");

    let first = fx
        .service
        .execute_update(&ctx, set_status(&["e1", "e3"], "DEPRECATED"))
        .await
        .expect("first update should succeed");
    let second = fx
        .service
        .execute_update(&ctx, set_status(&["e1", "e3"], "DEPRECATED"))
        .await
        .expect("second update should succeed");
    assert_eq!(first, second);

    let query = fx
        .service
        .execute_query(
            &ctx,
            EntityQueryRequest {
                entity_type: "API".to_string(),
                filter: Some(Filter::compare(
                    Operator::Eq,
                    "status",
                    string("DEPRECATED"),
                )),
                selection: columns(&["id"]),
                ..Default::default()
            },
        )
        .await
        .expect("query should succeed");
    assert_eq!(rows(&query), vec![vec![string("e1")], vec![string("e3")]]);
}

#[tokio::test]
async fn update_of_other_tenant_ids_touches_nothing_visible() {
    let fx = fixture(&[], &[]).await;
    let chunk = fx
        .service
        .execute_update(
            &RequestContext::for_tenant("t3"),
            set_status(&["e1"], "ACTIVE"),
        )
        .await
        .expect("update should succeed");
    assert!(chunk.row.is_empty());

    let t1 = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("t1"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                filter: Some(Filter::compare(Operator::Eq, "id", string("e1"))),
                selection: columns(&["status"]),
                ..Default::default()
            },
        )
        .await
        .expect("query should succeed");
    assert_eq!(rows(&t1), vec![vec![string("INACTIVE")]]);
}

#[tokio::test]
async fn colon_in_entity_id_cannot_reach_another_tenant() {
    let fx = fixture(&[], &[]).await;
    seed(
        fx.entities.as_ref(),
        &[entity("acme:eu", "e1", "billing", "INACTIVE", 1)],
    )
    .await;

    let chunk = fx
        .service
        .execute_update(
            &RequestContext::for_tenant("acme"),
            set_status(&["eu:e1"], "ACTIVE"),
        )
        .await
        .expect("update should succeed");
    assert!(chunk.row.is_empty());

    let owner = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("acme:eu"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                selection: columns(&["id", "status"]),
                ..Default::default()
            },
        )
        .await
        .expect("query should succeed");
    assert_eq!(rows(&owner), vec![vec![string("e1"), string("INACTIVE")]]);
}

#[tokio::test]
async fn invalid_like_pattern_is_a_request_error() {
    let fx = fixture(&[], &[]).await;
    let err = fx
        .service
        .execute_query(
            &RequestContext::for_tenant("t1"),
            EntityQueryRequest {
                entity_type: "API".to_string(),
                filter: Some(Filter::compare(Operator::Like, "apiName", string("("))),
                selection: columns(&["id"]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::RequestShape(_)));
    assert_eq!(err.code(), "ERR_INVALID_REQUEST");
    assert!(!err.is_retryable());
    assert_eq!(fx.entities.searches.load(Ordering::SeqCst), 0);
}
