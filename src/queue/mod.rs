pub mod memory;
pub mod postgres;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{QueueItem, QueueStats, QueueStatus};

pub use memory::InMemoryQueueStore;
pub use postgres::PgQueueStore;
pub use retry::RetryPolicy;

#[derive(Debug)]
pub enum QueueError {
    InvalidPayload(String),
    NotFound(Uuid),
    InvalidTransition {
        id: Uuid,
        from: QueueStatus,
        to: QueueStatus,
    },
    Storage(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::InvalidPayload(msg) => write!(f, "Invalid payload: {msg}"),
            QueueError::NotFound(id) => write!(f, "Queue item {id} not found"),
            QueueError::InvalidTransition { id, from, to } => {
                write!(f, "Queue item {id} cannot move from {from} to {to}")
            }
            QueueError::Storage(msg) => write!(f, "Queue storage error: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

/// Inspection filter for operator tooling.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub status: Option<QueueStatus>,
    pub limit: Option<usize>,
}

/// Storage for queue items and their lifecycle.
///
/// Producers only call `enqueue`. Status mutations belong to the worker;
/// operators read `stats`/`list` and run `cleanup`/`clear`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(
        &self,
        payload: serde_json::Value,
        max_attempts: Option<u32>,
    ) -> Result<Uuid, QueueError>;

    /// Items due for delivery, oldest due first. Does not change their status.
    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueItem>, QueueError>;

    async fn mark_sending(&self, id: Uuid) -> Result<(), QueueError>;

    async fn mark_sent(&self, id: Uuid) -> Result<(), QueueError>;

    /// Record a failed attempt. Returns the status the item ended up in
    /// (`Retrying` or `Dead`).
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<QueueStatus, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<QueueItem>, QueueError>;

    /// Remove sent and dead items last updated at least `max_age` ago.
    async fn cleanup(&self, max_age: Duration) -> Result<u64, QueueError>;

    /// Remove every item. Destructive; gate behind the strictest privilege.
    async fn clear(&self) -> Result<u64, QueueError>;
}

/// Shared enqueue validation for every store implementation.
pub(crate) fn validate_enqueue(
    payload: &serde_json::Value,
    max_attempts: Option<u32>,
    default_max_attempts: u32,
) -> Result<i32, QueueError> {
    match payload.as_object() {
        Some(map) if !map.is_empty() => {}
        Some(_) => {
            return Err(QueueError::InvalidPayload(
                "payload must not be empty".to_string(),
            ));
        }
        None => {
            return Err(QueueError::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        }
    }

    let max_attempts = max_attempts.unwrap_or(default_max_attempts);
    if max_attempts == 0 {
        return Err(QueueError::InvalidPayload(
            "max_attempts must be at least 1".to_string(),
        ));
    }

    i32::try_from(max_attempts)
        .map_err(|_| QueueError::InvalidPayload("max_attempts is too large".to_string()))
}

/// `now - max_age`, or `None` when the window reaches past the representable range.
pub(crate) fn cutoff(
    now: chrono::DateTime<chrono::Utc>,
    max_age: Duration,
) -> Option<chrono::DateTime<chrono::Utc>> {
    let age = chrono::Duration::from_std(max_age).ok()?;
    now.checked_sub_signed(age)
}

pub(crate) fn next_attempt_at(
    now: chrono::DateTime<chrono::Utc>,
    delay: Duration,
) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}
