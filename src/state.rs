use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::ChannelRouter;
use crate::middleware::audit::AuditLog;
use crate::queue::QueueStore;
use crate::worker::Worker;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QueueStore>,
    pub channels: Arc<ChannelRouter>,
    pub worker: Arc<Worker>,
    pub audit: Arc<dyn AuditLog>,
}
