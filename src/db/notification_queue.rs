use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{QueueItem, QueueStatus};

pub async fn enqueue(
    pool: &PgPool,
    id: Uuid,
    payload: &serde_json::Value,
    max_attempts: i32,
) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "INSERT INTO notification_queue (id, payload, max_attempts)
         VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(id)
    .bind(payload)
    .bind(max_attempts)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM notification_queue WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Lock a single row for the remainder of the transaction.
pub async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM notification_queue WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn list_due(pool: &PgPool, limit: i64) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM notification_queue
         WHERE status IN ('pending', 'retrying')
           AND next_attempt_at <= now()
         ORDER BY next_attempt_at ASC, created_at ASC, id ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Conditional claim: only a pending or retrying row moves to 'sending'.
/// Returns None when the row is missing or another claimer got there first.
pub async fn mark_sending(pool: &PgPool, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "UPDATE notification_queue SET status = 'sending', updated_at = now()
         WHERE id = $1 AND status IN ('pending', 'retrying')
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn mark_sent(pool: &PgPool, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "UPDATE notification_queue
         SET status = 'sent',
             attempts = LEAST(attempts + 1, max_attempts),
             updated_at = now()
         WHERE id = $1 AND status = 'sending'
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Record a failed attempt. With a retry delay the row becomes due again
/// `retry_delay` after the database clock; without one `next_attempt_at`
/// is left as is.
pub async fn record_failure(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempts: i32,
    status: QueueStatus,
    retry_delay: Option<Duration>,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE notification_queue
         SET status = $2,
             attempts = $3,
             next_attempt_at = CASE
                 WHEN $4::double precision IS NULL THEN next_attempt_at
                 ELSE now() + make_interval(secs => $4::double precision)
             END,
             last_error = $5,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(attempts)
    .bind(retry_delay.map(|d| d.as_secs_f64()))
    .bind(error)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(QueueStatus, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (QueueStatus, i64)>(
        "SELECT status, COUNT(*) FROM notification_queue GROUP BY status",
    )
    .fetch_all(pool)
    .await
}

pub async fn list(
    pool: &PgPool,
    status: Option<QueueStatus>,
    limit: Option<i64>,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM notification_queue
         WHERE ($1::text IS NULL OR status = $1)
         ORDER BY created_at ASC, id ASC
         LIMIT $2",
    )
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Delete sent/dead rows last touched at or before `cutoff`.
pub async fn delete_terminal_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM notification_queue
         WHERE status IN ('sent', 'dead') AND updated_at <= $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_all(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM notification_queue")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
