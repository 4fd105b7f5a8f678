#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::Notify;
use uuid::Uuid;

use courier::auth::jwt::{self, Claims};
use courier::config::{Config, QueueConfig};
use courier::dispatch::{Channel, ChannelRouter, DispatchError, DispatchOutcome, Dispatcher};
use courier::middleware::audit::{AuditEntry, AuditLog};
use courier::queue::{InMemoryQueueStore, QueueStore, RetryPolicy};
use courier::state::SharedState;
use courier::worker::{Worker, WorkerSettings};

pub const JWT_SECRET: &str = "test-jwt-secret-that-is-long-enough";

/// One scripted delivery result.
#[derive(Debug, Clone)]
pub enum Step {
    Deliver,
    Fail(&'static str),
    Error(&'static str),
    Panic(&'static str),
}

/// Test channel `"test"` that plays back a script, then delivers
/// (or fails, when built with `always_failing`).
pub struct ScriptedChannel {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    attempts: AtomicUsize,
}

impl ScriptedChannel {
    pub fn delivering() -> Arc<Self> {
        Self::with_script(Vec::new(), Step::Deliver)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::with_script(Vec::new(), Step::Fail("connection refused"))
    }

    pub fn with_script(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatcher for ScriptedChannel {
    fn validate(&self, payload: &Value) -> Result<(), DispatchError> {
        payload
            .get("to")
            .and_then(|v| v.as_str())
            .map(|_| ())
            .ok_or_else(|| DispatchError::from("to is required"))
    }

    async fn attempt(&self, _payload: &Value) -> Result<DispatchOutcome, DispatchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Deliver => Ok(DispatchOutcome::Delivered),
            Step::Fail(reason) => Ok(DispatchOutcome::failed(reason)),
            Step::Error(message) => Err(DispatchError::from(message)),
            Step::Panic(message) => panic!("{message}"),
        }
    }
}

impl Channel for ScriptedChannel {
    fn id(&self) -> &str {
        "test"
    }
}

/// Test channel `"test"` that blocks each attempt until released.
pub struct GateChannel {
    pub entered: Notify,
    pub release: Notify,
}

impl GateChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl Dispatcher for GateChannel {
    fn validate(&self, _payload: &Value) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn attempt(&self, _payload: &Value) -> Result<DispatchOutcome, DispatchError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(DispatchOutcome::Delivered)
    }
}

impl Channel for GateChannel {
    fn id(&self) -> &str {
        "test"
    }
}

/// Audit sink that keeps every entry for assertions.
#[derive(Default)]
pub struct RecordingAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditLog {
    pub fn actions(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

pub fn payload(to: &str) -> Value {
    json!({ "channel": "test", "to": to })
}

/// Retry immediately so failed items are due again on the next pass.
pub fn immediate_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::ZERO, Duration::ZERO)
}

pub fn memory_store() -> Arc<InMemoryQueueStore> {
    Arc::new(InMemoryQueueStore::new(immediate_retry(), 3))
}

pub fn settings(batch_limit: usize) -> WorkerSettings {
    WorkerSettings {
        batch_limit,
        pacing: Duration::ZERO,
        cleanup_interval: Duration::from_secs(60 * 60),
        retention: Duration::from_secs(24 * 60 * 60),
    }
}

pub fn router(channel: Arc<dyn Channel>) -> Arc<ChannelRouter> {
    let mut router = ChannelRouter::new();
    router.register(channel);
    Arc::new(router)
}

pub fn worker(
    store: Arc<dyn QueueStore>,
    channel: Arc<dyn Channel>,
    batch_limit: usize,
) -> Arc<Worker> {
    Arc::new(Worker::new(store, router(channel), settings(batch_limit)))
}

/// Poll `check` until it holds or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        jwt_secret: JWT_SECRET.to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        log_level: "warn".to_string(),
        queue: QueueConfig {
            interval: Duration::from_millis(50),
            pacing: Duration::ZERO,
            retry_base: Duration::ZERO,
            retry_max: Duration::ZERO,
            ..QueueConfig::default()
        },
        smtp: None,
        delivery_timeout: Duration::from_secs(5),
    }
}

/// A running test server backed by an in-memory store.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub state: SharedState,
    pub store: Arc<InMemoryQueueStore>,
    pub audit: Arc<RecordingAuditLog>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn token(&self, role: &str, system_admin: bool) -> String {
        let claims = Claims::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            role,
            system_admin,
            chrono::Duration::minutes(5),
        );
        jwt::encode_token(&claims, JWT_SECRET).unwrap()
    }

    pub fn operator_token(&self) -> String {
        self.token("admin", false)
    }

    pub fn member_token(&self) -> String {
        self.token("member", false)
    }

    pub fn system_admin_token(&self) -> String {
        self.token("owner", true)
    }

    /// Make an authenticated GET request.
    pub async fn get_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated POST request with JSON body.
    pub async fn post_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated POST request without a body.
    pub async fn post_empty(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

/// Spawn a test app on a random port with the given test channel.
pub async fn spawn_app(channel: Arc<dyn Channel>) -> TestApp {
    let config = test_config();
    let store = Arc::new(InMemoryQueueStore::new(
        courier::retry_policy(&config),
        config.queue.default_max_attempts,
    ));
    let audit = Arc::new(RecordingAuditLog::default());

    let mut channels = ChannelRouter::new();
    channels.register(channel);

    let state = courier::build_state(config, store.clone(), channels, audit.clone());
    let app = courier::build_app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        state,
        store,
        audit,
    }
}
