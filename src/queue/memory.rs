use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ListFilter, QueueError, QueueStore, RetryPolicy};
use crate::models::{QueueItem, QueueStats, QueueStatus};

/// Process-local queue store. Items live as long as the process does.
pub struct InMemoryQueueStore {
    items: DashMap<Uuid, QueueItem>,
    policy: RetryPolicy,
    default_max_attempts: u32,
}

impl InMemoryQueueStore {
    pub fn new(policy: RetryPolicy, default_max_attempts: u32) -> Self {
        Self {
            items: DashMap::new(),
            policy,
            default_max_attempts,
        }
    }

    /// Look up a single item by id.
    pub fn get(&self, id: Uuid) -> Option<QueueItem> {
        self.items.get(&id).map(|item| item.value().clone())
    }

    fn transition<F>(&self, id: Uuid, to: QueueStatus, apply: F) -> Result<QueueStatus, QueueError>
    where
        F: FnOnce(&mut QueueItem) -> Result<QueueStatus, QueueError>,
    {
        let mut entry = self.items.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        let item = entry.value_mut();

        let allowed = match to {
            QueueStatus::Sending => item.status.is_claimable(),
            _ => item.status == QueueStatus::Sending,
        };
        if !allowed {
            return Err(QueueError::InvalidTransition {
                id,
                from: item.status,
                to,
            });
        }

        apply(item)
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), 3)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(
        &self,
        payload: serde_json::Value,
        max_attempts: Option<u32>,
    ) -> Result<Uuid, QueueError> {
        let max_attempts =
            super::validate_enqueue(&payload, max_attempts, self.default_max_attempts)?;
        let now = Utc::now();
        let id = Uuid::now_v7();

        self.items.insert(
            id,
            QueueItem {
                id,
                payload,
                status: QueueStatus::Pending,
                attempts: 0,
                max_attempts,
                next_attempt_at: now,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        );

        Ok(id)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueItem>, QueueError> {
        let now = Utc::now();
        let mut due: Vec<QueueItem> = self
            .items
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();

        due.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        due.truncate(limit);

        Ok(due)
    }

    async fn mark_sending(&self, id: Uuid) -> Result<(), QueueError> {
        self.transition(id, QueueStatus::Sending, |item| {
            item.status = QueueStatus::Sending;
            item.updated_at = Utc::now();
            Ok(item.status)
        })?;
        Ok(())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), QueueError> {
        self.transition(id, QueueStatus::Sent, |item| {
            item.attempts = (item.attempts + 1).min(item.max_attempts);
            item.status = QueueStatus::Sent;
            item.updated_at = Utc::now();
            Ok(item.status)
        })?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<QueueStatus, QueueError> {
        let policy = self.policy;
        self.transition(id, QueueStatus::Retrying, |item| {
            let now = Utc::now();
            item.attempts = (item.attempts + 1).min(item.max_attempts);
            item.last_error = Some(reason.to_string());
            item.updated_at = now;

            let attempts = item.attempts as u32;
            if policy.should_dead_letter(attempts, item.max_attempts as u32) {
                item.status = QueueStatus::Dead;
            } else {
                item.status = QueueStatus::Retrying;
                item.next_attempt_at = super::next_attempt_at(now, policy.delay(attempts));
            }
            Ok(item.status)
        })
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for entry in self.items.iter() {
            stats.record(entry.value().status, 1);
        }
        Ok(stats)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<QueueItem>, QueueError> {
        let mut items: Vec<QueueItem> = self
            .items
            .iter()
            .filter(|entry| filter.status.is_none_or(|s| entry.value().status == s))
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }

        Ok(items)
    }

    async fn cleanup(&self, max_age: Duration) -> Result<u64, QueueError> {
        let Some(cutoff) = super::cutoff(Utc::now(), max_age) else {
            return Ok(0);
        };

        let mut removed = 0;
        self.items.retain(|_, item| {
            let stale = item.status.is_terminal() && item.updated_at <= cutoff;
            if stale {
                removed += 1;
            }
            !stale
        });

        Ok(removed)
    }

    async fn clear(&self) -> Result<u64, QueueError> {
        let mut removed = 0;
        self.items.retain(|_, _| {
            removed += 1;
            false
        });
        Ok(removed)
    }
}
