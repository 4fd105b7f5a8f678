use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ListFilter, QueueError, QueueStore, RetryPolicy};
use crate::db;
use crate::models::{QueueItem, QueueStats, QueueStatus};

/// Queue store backed by the `notification_queue` table.
///
/// `mark_sending` is a conditional update, so two processes sharing the
/// table cannot both hold the same item in `sending`.
pub struct PgQueueStore {
    pool: PgPool,
    policy: RetryPolicy,
    default_max_attempts: u32,
}

impl PgQueueStore {
    pub fn new(pool: PgPool, policy: RetryPolicy, default_max_attempts: u32) -> Self {
        Self {
            pool,
            policy,
            default_max_attempts,
        }
    }

    /// Explain why a conditional update matched no row.
    async fn rejection(&self, id: Uuid, to: QueueStatus) -> QueueError {
        match db::notification_queue::find_by_id(&self.pool, id).await {
            Ok(Some(item)) => QueueError::InvalidTransition {
                id,
                from: item.status,
                to,
            },
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(
        &self,
        payload: serde_json::Value,
        max_attempts: Option<u32>,
    ) -> Result<Uuid, QueueError> {
        let max_attempts =
            super::validate_enqueue(&payload, max_attempts, self.default_max_attempts)?;
        let item =
            db::notification_queue::enqueue(&self.pool, Uuid::now_v7(), &payload, max_attempts)
                .await?;
        Ok(item.id)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueItem>, QueueError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(db::notification_queue::list_due(&self.pool, limit).await?)
    }

    async fn mark_sending(&self, id: Uuid) -> Result<(), QueueError> {
        match db::notification_queue::mark_sending(&self.pool, id).await? {
            Some(_) => Ok(()),
            None => Err(self.rejection(id, QueueStatus::Sending).await),
        }
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), QueueError> {
        match db::notification_queue::mark_sent(&self.pool, id).await? {
            Some(_) => Ok(()),
            None => Err(self.rejection(id, QueueStatus::Sent).await),
        }
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<QueueStatus, QueueError> {
        let mut tx = self.pool.begin().await?;

        let item = db::notification_queue::find_for_update(&mut tx, id)
            .await?
            .ok_or(QueueError::NotFound(id))?;

        if item.status != QueueStatus::Sending {
            return Err(QueueError::InvalidTransition {
                id,
                from: item.status,
                to: QueueStatus::Retrying,
            });
        }

        let attempts = (item.attempts + 1).min(item.max_attempts);
        let dead = self
            .policy
            .should_dead_letter(attempts as u32, item.max_attempts as u32);
        let (status, retry_delay) = if dead {
            (QueueStatus::Dead, None)
        } else {
            (QueueStatus::Retrying, Some(self.policy.delay(attempts as u32)))
        };

        db::notification_queue::record_failure(&mut tx, id, attempts, status, retry_delay, reason)
            .await?;
        tx.commit().await?;

        Ok(status)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for (status, count) in db::notification_queue::count_by_status(&self.pool).await? {
            stats.record(status, count.max(0) as u64);
        }
        Ok(stats)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<QueueItem>, QueueError> {
        let limit = filter.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        Ok(db::notification_queue::list(&self.pool, filter.status, limit).await?)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<u64, QueueError> {
        let Some(cutoff) = super::cutoff(Utc::now(), max_age) else {
            return Ok(0);
        };
        Ok(db::notification_queue::delete_terminal_before(&self.pool, cutoff).await?)
    }

    async fn clear(&self) -> Result<u64, QueueError> {
        Ok(db::notification_queue::delete_all(&self.pool).await?)
    }
}
