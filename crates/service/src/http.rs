use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use eqs_docstore::Datastore;
use eqs_docstore::memory::InMemoryDatastore;
use eqs_docstore::postgres::PostgresDatastore;
use serde::Serialize;
use ulid::Ulid;

use crate::config::{ServiceConfig, StartupError, StoreKind};
use crate::service::{EntityQueryService, RequestContext};
use crate::ServiceError;

mod entities;
mod labels;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    service: EntityQueryService,
    datastore: Arc<dyn Datastore>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Connects the configured store and builds the router.
pub async fn router(config: ServiceConfig) -> Result<Router, StartupError> {
    let datastore: Arc<dyn Datastore> = match config.store {
        StoreKind::Memory => Arc::new(InMemoryDatastore::new()),
        StoreKind::Postgres => {
            let db_url = config.db_url.as_deref().ok_or_else(|| StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key EQS_DB_URL".to_string(),
            })?;
            let store = PostgresDatastore::connect(
                db_url,
                config.db_max_connections,
                Duration::from_millis(config.db_acquire_timeout_ms),
            )
            .await
            .map_err(|err| StartupError {
                code: "ERR_STORE_UNAVAILABLE",
                message: format!("failed to connect document store: {}", err),
            })?;
            Arc::new(store)
        }
    };

    router_with_datastore(config, datastore).await
}

/// Builds the router over an already constructed datastore.
pub async fn router_with_datastore(
    config: ServiceConfig,
    datastore: Arc<dyn Datastore>,
) -> Result<Router, StartupError> {
    let service = EntityQueryService::open(
        datastore.as_ref(),
        config.attribute_map.clone(),
        &config.entities_collection,
        &config.labels_collection,
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to open collections: {}", err),
    })?;

    let state = AppState {
        config,
        service,
        datastore,
    };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/entities/query", post(entities::execute_query))
        .route("/v1/entities/update", post(entities::execute_update))
        .route(
            "/v1/labels",
            post(labels::create_label).get(labels::list_labels),
        )
        .route("/v1/labels/{id}", get(labels::get_label))
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let store_ready = tokio::time::timeout(
        Duration::from_millis(state.config.db_acquire_timeout_ms.max(50)),
        state.datastore.ping(),
    )
    .await
    .is_ok_and(|res| res.is_ok());
    checks.insert("document_store", store_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_tenant
        && let Err(err) = request_context(&headers).tenant_id()
    {
        return error_response(&err).into_response();
    }

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let tenant_id = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    RequestContext::new(tenant_id, extract_request_id(headers))
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

/// Records latency and outcome on the current span and the request metrics.
fn finish_request<T>(
    route: &'static str,
    method: &'static str,
    started: Instant,
    result: &Result<T, ApiError>,
) {
    let latency = started.elapsed();
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };

    let span = tracing::Span::current();
    span.record("latency_ms", latency.as_millis() as u64);
    span.record("outcome", if result.is_ok() { "ok" } else { "error" });

    crate::metrics::observe_http_request(route, method, status.as_u16(), latency);
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
            detail: None,
        }),
    )
}

fn invalid_json_body() -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_REQUEST",
        "invalid JSON body",
        false,
    )
}

fn error_response(err: &ServiceError) -> ApiError {
    let status = match err {
        ServiceError::MissingTenant => StatusCode::UNAUTHORIZED,
        ServiceError::RequestShape(_) => StatusCode::BAD_REQUEST,
        ServiceError::AmbiguousKey { .. } => StatusCode::CONFLICT,
        ServiceError::Storage { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(code = err.code(), error = %err, "request failed");
    }

    let (status, Json(mut body)) = json_error(status, err.code(), err.to_string(), err.is_retryable());
    if let ServiceError::Storage { detail, .. } = err {
        body.detail = detail.clone();
    }
    (status, Json(body))
}
