//! PostgreSQL-backed collections: one `jsonb` table per collection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    Collection, Datastore, Document, Filter, FilterOp, Key, Query, StoreError, TENANT_FIELD,
    is_valid_collection_name, split_path, with_document_key,
};

#[derive(Clone)]
pub struct PostgresDatastore {
    pool: PgPool,
}

impl PostgresDatastore {
    pub async fn connect(
        db_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            acquire_timeout,
            PgPoolOptions::new()
                .max_connections(max_connections.max(1))
                .acquire_timeout(acquire_timeout)
                .connect(db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Datastore for PostgresDatastore {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        if !is_valid_collection_name(name) {
            return Err(StoreError::InvalidCollectionName(name.to_string()));
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id TEXT PRIMARY KEY, \
             document JSONB NOT NULL, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now())",
            name
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        tracing::debug!(collection = name, "document collection ready");

        let collection: Arc<dyn Collection> = Arc::new(PostgresCollection {
            pool: self.pool.clone(),
            table: name.to_string(),
        });
        Ok(collection)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PostgresCollection {
    pool: PgPool,
    table: String,
}

#[async_trait]
impl Collection for PostgresCollection {
    fn name(&self) -> &str {
        &self.table
    }

    async fn search(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut builder = build_search(&self.table, query)?;
        let documents = builder
            .build_query_scalar::<serde_json::Value>()
            .fetch_all(&self.pool)
            .await?;
        Ok(documents)
    }

    async fn upsert(&self, key: &Key, document: Document) -> Result<bool, StoreError> {
        let document = with_document_key(key, document)?;
        let sql = format!(
            "INSERT INTO {table} (id, document) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document, updated_at = now() \
             WHERE {table}.document ->> '{tenant}' = $3",
            table = self.table,
            tenant = TENANT_FIELD,
        );
        let result = sqlx::query(&sql)
            .bind(key.to_string())
            .bind(&document)
            .bind(&key.tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_sub_doc(
        &self,
        key: &Key,
        sub_doc_path: &str,
        sub_document: Document,
    ) -> Result<bool, StoreError> {
        let path = split_path(sub_doc_path);
        if path.is_empty() {
            return Err(StoreError::InvalidDocument(
                "sub-document path must be non-empty".to_string(),
            ));
        }

        let mut builder = build_update_sub_doc(&self.table, key, path, sub_document);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Sets `path` inside the tenant's document, creating missing parent objects.
///
/// Matches no row when the document belongs to another tenant or a parent on
/// the path holds a non-object value.
fn build_update_sub_doc<'a>(
    table: &str,
    key: &Key,
    path: Vec<String>,
    sub_document: Document,
) -> QueryBuilder<'a, Postgres> {
    let parents: Vec<Vec<String>> = (1..path.len()).map(|len| path[..len].to_vec()).collect();

    let mut builder = QueryBuilder::new(format!("UPDATE {} SET document = ", table));
    builder.push("jsonb_set(".repeat(parents.len() + 1));
    builder.push("document");
    for parent in &parents {
        builder.push(", ");
        builder.push_bind(parent.clone());
        builder.push(", COALESCE(document #> ");
        builder.push_bind(parent.clone());
        builder.push(", '{}'::jsonb), true)");
    }
    builder.push(", ");
    builder.push_bind(path);
    builder.push(", ");
    builder.push_bind(sub_document);
    builder.push(", true), updated_at = now() WHERE id = ");
    builder.push_bind(key.to_string());
    builder.push(format!(" AND document ->> '{}' = ", TENANT_FIELD));
    builder.push_bind(key.tenant_id.clone());
    for parent in parents {
        builder.push(" AND jsonb_typeof(COALESCE(document #> ");
        builder.push_bind(parent);
        builder.push(", '{}'::jsonb)) = 'object'");
    }
    builder
}

fn build_search<'a>(table: &str, query: &Query) -> Result<QueryBuilder<'a, Postgres>, StoreError> {
    let mut builder = QueryBuilder::new(format!("SELECT document FROM {}", table));

    if let Some(filter) = &query.filter {
        builder.push(" WHERE ");
        push_filter(&mut builder, filter)?;
    }

    if !query.order_by.is_empty() {
        builder.push(" ORDER BY ");
        for (idx, order) in query.order_by.iter().enumerate() {
            if idx > 0 {
                builder.push(", ");
            }
            builder.push("document #> ");
            builder.push_bind(split_path(&order.field));
            builder.push(if order.is_asc { " ASC" } else { " DESC" });
        }
    } else {
        builder.push(" ORDER BY id");
    }

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::from(limit));
    }
    if let Some(offset) = query.offset {
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(offset));
    }

    Ok(builder)
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) -> Result<(), StoreError> {
    match filter.op {
        FilterOp::And | FilterOp::Or => {
            if filter.child_filters.is_empty() {
                builder.push(if filter.op == FilterOp::And { "TRUE" } else { "FALSE" });
                return Ok(());
            }
            let joiner = if filter.op == FilterOp::And { " AND " } else { " OR " };
            builder.push("(");
            for (idx, child) in filter.child_filters.iter().enumerate() {
                if idx > 0 {
                    builder.push(joiner);
                }
                push_filter(builder, child)?;
            }
            builder.push(")");
        }
        FilterOp::Eq => {
            push_field(builder, filter);
            builder.push(" = ");
            builder.push_bind(filter.value.clone());
        }
        FilterOp::Neq => {
            push_field(builder, filter);
            builder.push(" IS DISTINCT FROM ");
            builder.push_bind(filter.value.clone());
        }
        FilterOp::In | FilterOp::NotIn => {
            if !filter.value.is_array() {
                return Err(StoreError::UnsupportedFilter(format!(
                    "{} on `{}` requires an array value",
                    filter.op.as_str(),
                    filter.field_name
                )));
            }
            if filter.op == FilterOp::NotIn {
                builder.push("NOT ");
            }
            builder.push("COALESCE(");
            builder.push_bind(filter.value.clone());
            builder.push(" @> jsonb_build_array(");
            push_field(builder, filter);
            builder.push("), FALSE)");
        }
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            let op = match filter.op {
                FilterOp::Gt => " > ",
                FilterOp::Lt => " < ",
                FilterOp::Gte => " >= ",
                _ => " <= ",
            };
            builder.push("(jsonb_typeof(");
            push_field(builder, filter);
            builder.push(") = jsonb_typeof(");
            builder.push_bind(filter.value.clone());
            builder.push(") AND ");
            push_field(builder, filter);
            builder.push(op);
            builder.push_bind(filter.value.clone());
            builder.push(")");
        }
        FilterOp::Like => {
            let pattern = filter.value.as_str().ok_or_else(|| {
                StoreError::UnsupportedFilter(format!(
                    "LIKE on `{}` requires a string pattern",
                    filter.field_name
                ))
            })?;
            builder.push("document #>> ");
            builder.push_bind(split_path(&filter.field_name));
            builder.push(" ~* ");
            builder.push_bind(pattern.to_string());
        }
        FilterOp::Exists | FilterOp::NotExists => {
            if filter.op == FilterOp::NotExists {
                builder.push("NOT ");
            }
            builder.push("COALESCE(");
            push_field(builder, filter);
            builder.push(" <> 'null'::jsonb, FALSE)");
        }
    }
    Ok(())
}

fn push_field(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    builder.push("(document #> ");
    builder.push_bind(split_path(&filter.field_name));
    builder.push(")");
}
