use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use eqs_contracts::query::{EntityQueryRequest, EntityUpdateRequest, ResultSetChunk};
use tracing::Instrument;

use super::{ApiError, AppState, error_response, finish_request, invalid_json_body, request_context};

pub(super) async fn execute_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<EntityQueryRequest>, JsonRejection>,
) -> Result<Json<Vec<ResultSetChunk>>, ApiError> {
    let ctx = request_context(&headers);
    let span = tracing::info_span!(
        "entity.query",
        request_id = %ctx.request_id(),
        tenant_id = ctx.tenant_id().unwrap_or_default(),
        entity_type = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = async {
            ctx.tenant_id().map_err(|err| error_response(&err))?;
            let Json(req) = req.map_err(|_| invalid_json_body())?;
            tracing::Span::current().record("entity_type", req.entity_type.as_str());

            let chunk = state
                .service
                .execute_query(&ctx, req)
                .await
                .map_err(|err| error_response(&err))?;
            tracing::info!(rows = chunk.row.len(), "entity query served");
            Ok::<_, ApiError>(Json(vec![chunk]))
        }
        .await;

        finish_request("/v1/entities/query", "POST", started, &result);
        result
    }
    .instrument(span)
    .await
}

pub(super) async fn execute_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<EntityUpdateRequest>, JsonRejection>,
) -> Result<Json<Vec<ResultSetChunk>>, ApiError> {
    let ctx = request_context(&headers);
    let span = tracing::info_span!(
        "entity.update",
        request_id = %ctx.request_id(),
        tenant_id = ctx.tenant_id().unwrap_or_default(),
        entity_type = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = async {
            ctx.tenant_id().map_err(|err| error_response(&err))?;
            let Json(req) = req.map_err(|_| invalid_json_body())?;
            tracing::Span::current().record("entity_type", req.entity_type.as_str());

            let chunk = state
                .service
                .execute_update(&ctx, req)
                .await
                .map_err(|err| error_response(&err))?;
            Ok::<_, ApiError>(Json(vec![chunk]))
        }
        .await;

        finish_request("/v1/entities/update", "POST", started, &result);
        result
    }
    .instrument(span)
    .await
}
