use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;

use crate::auth::extractor::AuthUser;
use crate::error::AppError;
use crate::middleware::audit::AuditEntry;
use crate::models::QueueStatus;
use crate::queue::ListFilter;
use crate::state::SharedState;

#[derive(Deserialize, Default)]
pub struct StatusParams {
    pub details: Option<bool>,
    pub status: Option<QueueStatus>,
    pub limit: Option<usize>,
}

#[derive(Deserialize, Default)]
pub struct StartRequest {
    pub interval_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
pub struct CleanupRequest {
    pub max_age_ms: Option<u64>,
}

pub async fn status(
    auth: AuthUser,
    State(state): State<SharedState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_operator()?;

    let worker = state.worker.status().await?;
    let mut body = json!({
        "stats": worker.queue_stats,
        "worker": worker,
    });

    if params.details.unwrap_or(false) {
        let filter = ListFilter {
            status: params.status,
            limit: params.limit,
        };
        body["items"] = json!(state.store.list(&filter).await?);
    }

    Ok(Json(body))
}

pub async fn start(
    auth: AuthUser,
    State(state): State<SharedState>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_operator()?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let interval = interval_or_default(&state, req.interval_ms)?;
    let started = state.worker.start(interval);

    state
        .audit
        .record(AuditEntry::queue_command(
            &auth,
            "queue.started",
            Some(json!({ "interval_ms": interval.as_millis() as u64, "started": started })),
        ))
        .await;

    let worker = state.worker.status().await?;
    let message = if started {
        "Worker started"
    } else {
        "Worker already running"
    };

    Ok(Json(json!({ "message": message, "started": started, "worker": worker })))
}

pub async fn restart(
    auth: AuthUser,
    State(state): State<SharedState>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_operator()?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let interval = interval_or_default(&state, req.interval_ms)?;
    state.worker.restart(interval);

    state
        .audit
        .record(AuditEntry::queue_command(
            &auth,
            "queue.restarted",
            Some(json!({ "interval_ms": interval.as_millis() as u64 })),
        ))
        .await;

    let worker = state.worker.status().await?;
    Ok(Json(json!({ "message": "Worker restarted", "worker": worker })))
}

pub async fn stop(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_operator()?;

    let stopped = state.worker.stop();

    state
        .audit
        .record(AuditEntry::queue_command(
            &auth,
            "queue.stopped",
            Some(json!({ "stopped": stopped })),
        ))
        .await;

    let worker = state.worker.status().await?;
    let message = if stopped {
        "Worker stopped"
    } else {
        "Worker was not running"
    };

    Ok(Json(json!({ "message": message, "stopped": stopped, "worker": worker })))
}

pub async fn trigger(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_operator()?;

    let report = state.worker.trigger_manual_processing().await?;

    state
        .audit
        .record(AuditEntry::queue_command(
            &auth,
            "queue.triggered",
            Some(json!(report)),
        ))
        .await;

    Ok(Json(json!(report)))
}

pub async fn cleanup(
    auth: AuthUser,
    State(state): State<SharedState>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_operator()?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let max_age = req
        .max_age_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.queue.cleanup_default_max_age);

    let removed = state.store.cleanup(max_age).await?;

    state
        .audit
        .record(AuditEntry::queue_command(
            &auth,
            "queue.cleanup",
            Some(json!({ "max_age_ms": max_age.as_millis() as u64, "removed": removed })),
        ))
        .await;

    Ok(Json(json!({ "removed": removed })))
}

pub async fn clear(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_system_admin()?;

    let removed = state.store.clear().await?;
    tracing::warn!("Queue cleared by {} ({removed} items)", auth.user_id);

    state
        .audit
        .record(AuditEntry::queue_command(
            &auth,
            "queue.cleared",
            Some(json!({ "removed": removed })),
        ))
        .await;

    Ok(Json(json!({ "removed": removed })))
}

fn interval_or_default(
    state: &SharedState,
    interval_ms: Option<u64>,
) -> Result<Duration, AppError> {
    match interval_ms {
        Some(0) => Err(AppError::BadRequest(
            "interval_ms must be greater than zero".to_string(),
        )),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(state.config.queue.interval),
    }
}
