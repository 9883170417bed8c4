// JSON API handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::models::MetricKind;
use crate::version;

pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": version::NAME,
        "version": version::VERSION,
    }))
}

pub(super) async fn connections_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.connection_summaries().await)
}

pub(super) async fn domains_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.domain_summaries().await)
}

pub(super) async fn domain_detail_handler(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> impl IntoResponse {
    match state.scheduler.domain_descriptor(uuid).await {
        Some(descriptor) => Json(serde_json::json!({
            "uuid": uuid,
            "descriptor": descriptor,
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, "unknown domain").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    metric: String,
}

pub(super) async fn domain_history_handler(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let kind: MetricKind = match query.metric.parse() {
        Ok(kind) => kind,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    match state.scheduler.domain_history(uuid, kind).await {
        Some(values) => Json(values).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown domain").into_response(),
    }
}
