use std::time::Instant;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use eqs_contracts::EntityLabel;
use tracing::Instrument;

use super::{ApiError, AppState, error_response, finish_request, invalid_json_body, request_context};

pub(super) async fn create_label(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<EntityLabel>, JsonRejection>,
) -> Result<Json<Vec<EntityLabel>>, ApiError> {
    let ctx = request_context(&headers);
    let span = tracing::info_span!(
        "label.create",
        request_id = %ctx.request_id(),
        tenant_id = ctx.tenant_id().unwrap_or_default(),
        label_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = async {
            ctx.tenant_id().map_err(|err| error_response(&err))?;
            let Json(label) = req.map_err(|_| invalid_json_body())?;

            let label = state
                .service
                .create_label(&ctx, label)
                .await
                .map_err(|err| error_response(&err))?;
            tracing::Span::current().record("label_id", label.id.as_str());
            Ok::<_, ApiError>(Json(vec![label]))
        }
        .await;

        finish_request("/v1/labels", "POST", started, &result);
        result
    }
    .instrument(span)
    .await
}

pub(super) async fn get_label(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(label_id): Path<String>,
) -> Result<Json<Vec<EntityLabel>>, ApiError> {
    let ctx = request_context(&headers);
    let span = tracing::info_span!(
        "label.get",
        request_id = %ctx.request_id(),
        tenant_id = ctx.tenant_id().unwrap_or_default(),
        label_id = %label_id,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = state
            .service
            .get_label_by_id(&ctx, &label_id)
            .await
            .map(|label| Json(vec![label]))
            .map_err(|err| error_response(&err));

        finish_request("/v1/labels/{id}", "GET", started, &result);
        result
    }
    .instrument(span)
    .await
}

pub(super) async fn list_labels(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<EntityLabel>>, ApiError> {
    let ctx = request_context(&headers);
    let span = tracing::info_span!(
        "label.list",
        request_id = %ctx.request_id(),
        tenant_id = ctx.tenant_id().unwrap_or_default(),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    async move {
        let result = state
            .service
            .list_labels_for_tenant(&ctx)
            .await
            .map(Json)
            .map_err(|err| error_response(&err));

        finish_request("/v1/labels", "GET", started, &result);
        result
    }
    .instrument(span)
    .await
}
