use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use courier::config::Config;
use courier::middleware::audit::{AuditLog, PgAuditLog, TracingAuditLog};
use courier::queue::{InMemoryQueueStore, PgQueueStore, QueueStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting Courier");

    let policy = courier::retry_policy(&config);
    let max_attempts = config.queue.default_max_attempts;

    let (store, audit): (Arc<dyn QueueStore>, Arc<dyn AuditLog>) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            tracing::info!("Migrations applied, using PostgreSQL queue store");
            (
                Arc::new(PgQueueStore::new(pool.clone(), policy, max_attempts)),
                Arc::new(PgAuditLog::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, queue items live in memory only");
            (
                Arc::new(InMemoryQueueStore::new(policy, max_attempts)),
                Arc::new(TracingAuditLog),
            )
        }
    };

    let channels = courier::build_channels(&config);
    let addr = SocketAddr::new(config.host, config.port);
    let autostart = config.queue.autostart;
    let interval = config.queue.interval;

    let state = courier::build_state(config, store, channels, audit);

    if autostart {
        state.worker.start(interval);
    } else {
        tracing::info!(
            "Queue worker not started (set COURIER_WORKER_AUTOSTART=true to start on boot)"
        );
    }

    let app = courier::build_app(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.worker.stop();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
