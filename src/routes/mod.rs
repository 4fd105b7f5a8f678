pub mod notifications;
pub mod queue;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Producers
        .route("/api/v1/notifications", post(notifications::enqueue))
        .route("/api/v1/channels", get(notifications::list_channels))
        // Queue control
        .route("/api/v1/admin/queue", get(queue::status))
        .route("/api/v1/admin/queue/start", post(queue::start))
        .route("/api/v1/admin/queue/restart", post(queue::restart))
        .route("/api/v1/admin/queue/stop", post(queue::stop))
        .route("/api/v1/admin/queue/trigger", post(queue::trigger))
        .route("/api/v1/admin/queue/cleanup", post(queue::cleanup))
        .route("/api/v1/admin/queue/clear", post(queue::clear))
}
