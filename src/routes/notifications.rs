use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::json;

use crate::auth::extractor::AuthUser;
use crate::dispatch::Dispatcher;
use crate::error::AppError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct EnqueueNotification {
    pub payload: serde_json::Value,
    pub max_attempts: Option<u32>,
}

pub async fn enqueue(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Json(req): Json<EnqueueNotification>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .channels
        .validate(&req.payload)
        .map_err(|e| AppError::BadRequest(e.message))?;

    let id = state.store.enqueue(req.payload, req.max_attempts).await?;
    tracing::debug!("Enqueued notification {id}");

    Ok(Json(json!({ "id": id })))
}

pub async fn list_channels(
    _auth: AuthUser,
    State(state): State<SharedState>,
) -> Json<serde_json::Value> {
    Json(json!({ "channels": state.channels.channel_ids() }))
}
