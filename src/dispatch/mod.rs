pub mod email;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
}

impl DispatchOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        DispatchOutcome::Failed(reason.into())
    }
}

/// A contract violation by the caller (malformed payload, unregistered
/// channel). Ordinary delivery failures are `DispatchOutcome::Failed`.
#[derive(Debug)]
pub struct DispatchError {
    pub message: String,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DispatchError {}

impl From<String> for DispatchError {
    fn from(s: String) -> Self {
        DispatchError { message: s }
    }
}

impl From<&str> for DispatchError {
    fn from(s: &str) -> Self {
        DispatchError {
            message: s.to_string(),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Reject payloads this dispatcher could never deliver.
    fn validate(&self, payload: &serde_json::Value) -> Result<(), DispatchError>;

    async fn attempt(&self, payload: &serde_json::Value) -> Result<DispatchOutcome, DispatchError>;
}

/// A delivery transport selected by the payload's `channel` field.
pub trait Channel: Dispatcher {
    fn id(&self) -> &str;
}

/// Routes each payload to the channel named in `payload.channel`.
pub struct ChannelRouter {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.id().to_string(), channel);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(id)
    }

    pub fn channel_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn resolve(&self, payload: &serde_json::Value) -> Result<&Arc<dyn Channel>, DispatchError> {
        let id = payload
            .get("channel")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DispatchError::from("channel is required"))?;

        self.get(id)
            .ok_or_else(|| DispatchError::from(format!("Unknown channel: {id}")))
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for ChannelRouter {
    fn validate(&self, payload: &serde_json::Value) -> Result<(), DispatchError> {
        self.resolve(payload)?.validate(payload)
    }

    async fn attempt(&self, payload: &serde_json::Value) -> Result<DispatchOutcome, DispatchError> {
        self.resolve(payload)?.attempt(payload).await
    }
}

/// Read a required, non-empty string field from a payload.
pub(crate) fn required_str<'a>(
    payload: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, DispatchError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DispatchError::from(format!("{field} is required")))
}
