//! PostgreSQL store tests. Skipped unless `DATABASE_URL` points at a server
//! where the test user may create databases.

mod common;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use courier::models::QueueStatus;
use courier::queue::{ListFilter, PgQueueStore, QueueError, QueueStore, RetryPolicy};

use common::payload;

struct TestDb {
    pool: PgPool,
    admin_url: String,
    db_name: String,
}

async fn test_db() -> Option<TestDb> {
    let _ = dotenvy::dotenv();
    let base_url = std::env::var("DATABASE_URL").ok()?;

    let db_name = format!("courier_test_{}", Uuid::now_v7().simple());
    let admin_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.clone());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url)
        .await
        .expect("Failed to connect to postgres for test DB creation");
    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");
    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    Some(TestDb {
        pool,
        admin_url,
        db_name,
    })
}

async fn drop_db(db: TestDb) {
    db.pool.close().await;
    if let Ok(admin_pool) = PgPoolOptions::new()
        .max_connections(2)
        .connect(&db.admin_url)
        .await
    {
        let _ = sqlx::query(&format!(
            "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
            db.db_name
        ))
        .execute(&admin_pool)
        .await;
        admin_pool.close().await;
    }
}

#[tokio::test]
async fn pg_store_lifecycle() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let store = PgQueueStore::new(db.pool.clone(), common::immediate_retry(), 3);

    let id = store.enqueue(payload("a@example.com"), Some(2)).await.unwrap();
    let due = store.claim_due(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].status, QueueStatus::Pending);

    store.mark_sending(id).await.unwrap();
    let err = store.mark_sending(id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { from: QueueStatus::Sending, .. }));

    assert_eq!(store.mark_failed(id, "timeout").await.unwrap(), QueueStatus::Retrying);
    store.mark_sending(id).await.unwrap();
    assert_eq!(store.mark_failed(id, "timeout").await.unwrap(), QueueStatus::Dead);

    let items = store.list(&ListFilter::default()).await.unwrap();
    assert_eq!(items[0].attempts, 2);
    assert_eq!(items[0].last_error.as_deref(), Some("timeout"));

    assert!(store.mark_sending(id).await.is_err());
    let missing = Uuid::now_v7();
    assert!(matches!(store.mark_sent(missing).await, Err(QueueError::NotFound(_))));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.total, 1);

    assert_eq!(store.cleanup(Duration::from_secs(3600)).await.unwrap(), 0);
    assert_eq!(store.cleanup(Duration::ZERO).await.unwrap(), 1);

    store.enqueue(payload("b@example.com"), None).await.unwrap();
    assert_eq!(store.clear().await.unwrap(), 1);
    assert_eq!(store.stats().await.unwrap().total, 0);

    drop_db(db).await;
}

#[tokio::test]
async fn pg_store_rejects_invalid_payload() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let store = PgQueueStore::new(db.pool.clone(), common::immediate_retry(), 3);

    let err = store.enqueue(serde_json::json!([]), None).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidPayload(_)));
    assert_eq!(store.stats().await.unwrap().total, 0);

    drop_db(db).await;
}

#[tokio::test]
async fn pg_retry_is_scheduled_from_database_clock() {
    let Some(db) = test_db().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let policy = RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(3600));
    let store = PgQueueStore::new(db.pool.clone(), policy, 5);

    let id = store.enqueue(payload("a@example.com"), None).await.unwrap();

    for expected_secs in [60, 120, 240] {
        store.mark_sending(id).await.unwrap();
        assert_eq!(store.mark_failed(id, "timeout").await.unwrap(), QueueStatus::Retrying);

        let item = store.list(&ListFilter::default()).await.unwrap().remove(0);
        let gap = item.next_attempt_at - item.updated_at;
        assert_eq!(gap, chrono::Duration::seconds(expected_secs));
    }

    // Not due yet, so nothing is claimable
    assert!(store.claim_due(10).await.unwrap().is_empty());

    drop_db(db).await;
}
