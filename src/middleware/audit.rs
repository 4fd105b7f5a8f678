use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::extractor::AuthUser;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn queue_command(
        auth: &AuthUser,
        action: &str,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            tenant_id: auth.tenant_id(),
            user_id: Some(auth.user_id),
            action: action.to_string(),
            resource_type: "queue".to_string(),
            resource_id: None,
            details,
        }
    }
}

/// Sink for operator command audit records. Recording never fails the
/// command that produced it.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Writes audit records to the `audit_events` table.
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = crate::db::audit::insert(&self.pool, &entry).await {
            tracing::error!("Failed to log audit event: {e}");
        }
    }
}

/// Emits audit records as structured log lines when no database is configured.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            tenant_id = %entry.tenant_id,
            user_id = ?entry.user_id,
            resource_type = %entry.resource_type,
            details = ?entry.details,
            "{}",
            entry.action
        );
    }
}
