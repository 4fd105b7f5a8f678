pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::dispatch::ChannelRouter;
use crate::dispatch::email::EmailDispatcher;
use crate::dispatch::webhook::WebhookDispatcher;
use crate::middleware::audit::AuditLog;
use crate::queue::{QueueStore, RetryPolicy};
use crate::state::{AppState, SharedState};
use crate::worker::{Worker, WorkerSettings};

/// Register the delivery channels the configuration enables.
pub fn build_channels(config: &Config) -> ChannelRouter {
    let mut channels = ChannelRouter::new();

    match WebhookDispatcher::new(config.delivery_timeout) {
        Ok(webhook) => channels.register(Arc::new(webhook)),
        Err(e) => tracing::warn!("Webhook channel not available: {e}"),
    }

    if let Some(smtp) = config.smtp.as_ref() {
        match EmailDispatcher::new(smtp, config.delivery_timeout) {
            Ok(email) => {
                tracing::info!("System SMTP configured");
                channels.register(Arc::new(email));
            }
            Err(e) => tracing::warn!("System SMTP not available: {e}"),
        }
    }

    channels
}

pub fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::new(config.queue.retry_base, config.queue.retry_max)
}

/// Wire the store, channels and audit sink into a worker and shared state.
/// The worker is not started here.
pub fn build_state(
    config: Config,
    store: Arc<dyn QueueStore>,
    channels: ChannelRouter,
    audit: Arc<dyn AuditLog>,
) -> SharedState {
    let channels = Arc::new(channels);
    let worker = Arc::new(Worker::new(
        store.clone(),
        channels.clone(),
        WorkerSettings::from(&config.queue),
    ));

    Arc::new(AppState {
        config,
        store,
        channels,
        worker,
        audit,
    })
}

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
