use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use nphies_core::query::{self, LogDetail, LogPage, StatsSnapshot, TriggerResponse};
use nphies_core::types::TriggerType;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_PAGE_LIMIT: usize = 20;

/// POST /api/poll/trigger
///
/// Runs one manual poll and returns the finalized run.
///
/// The run is spawned so a client disconnect does not cancel it.
pub async fn trigger_poll(State(app): State<AppState>) -> Result<Json<TriggerResponse>, AppError> {
    let poller = Arc::clone(&app.poller);
    let run = tokio::spawn(async move { poller.trigger(TriggerType::Manual).await })
        .await
        .map_err(AppError::join)??;
    Ok(Json(TriggerResponse::from_run(&run)))
}

/// POST /api/poll/cancel
///
/// Stops the in-flight run, if any.
pub async fn cancel_poll(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cancelled = app.poller.cancel();
    Json(serde_json::json!({ "cancelled": cancelled }))
}

/// GET /api/poll/stats
pub async fn get_stats(State(app): State<AppState>) -> Result<Json<StatsSnapshot>, AppError> {
    let store = app.store();
    let stats = tokio::task::spawn_blocking(move || query::get_stats(&store, Utc::now()))
        .await
        .map_err(AppError::join)??;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /api/poll/logs?page=&limit=
pub async fn list_logs(
    State(app): State<AppState>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<LogPage>, AppError> {
    let store = app.store();
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let logs = tokio::task::spawn_blocking(move || query::get_logs(&store, page, limit))
        .await
        .map_err(AppError::join)??;
    Ok(Json(logs))
}

/// GET /api/poll/logs/{id}
pub async fn get_log(
    State(app): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<LogDetail>, AppError> {
    let store = app.store();
    let detail = tokio::task::spawn_blocking(move || query::get_log(&store, id))
        .await
        .map_err(AppError::join)??;
    Ok(Json(detail))
}
