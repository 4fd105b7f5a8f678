use sqlx::PgPool;

use crate::middleware::audit::AuditEntry;

pub async fn insert(pool: &PgPool, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_events (tenant_id, user_id, action, resource_type, resource_id, details)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.tenant_id)
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(entry.resource_id)
    .bind(&entry.details)
    .execute(pool)
    .await?;
    Ok(())
}
