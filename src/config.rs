use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub queue: QueueConfig,
    pub smtp: Option<SmtpConfig>,
    pub delivery_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Timer cadence used when `start` is called without an override.
    pub interval: Duration,
    pub batch_limit: usize,
    /// Pause between items within one pass.
    pub pacing: Duration,
    pub default_max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub cleanup_interval: Duration,
    /// Age after which the cleanup timer drops sent/dead items.
    pub retention: Duration,
    /// Age used by the manual cleanup command when none is given.
    pub cleanup_default_max_age: Duration,
    pub autostart: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_limit: 10,
            pacing: Duration::from_millis(100),
            default_max_attempts: 3,
            retry_base: Duration::from_secs(60),
            retry_max: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            cleanup_default_max_age: Duration::from_secs(60 * 60),
            autostart: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let jwt_secret = env_required("JWT_SECRET")?;

        let host: IpAddr = env_or("COURIER_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid COURIER_HOST: {e}"))?;

        let port: u16 = env_or("COURIER_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid COURIER_PORT: {e}"))?;

        let log_level = env_or("COURIER_LOG_LEVEL", "info");

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            interval: env_millis("COURIER_QUEUE_INTERVAL_MS", defaults.interval)?,
            batch_limit: env_parse("COURIER_QUEUE_BATCH_LIMIT", defaults.batch_limit)?,
            pacing: env_millis("COURIER_QUEUE_PACING_MS", defaults.pacing)?,
            default_max_attempts: env_parse(
                "COURIER_QUEUE_MAX_ATTEMPTS",
                defaults.default_max_attempts,
            )?,
            retry_base: env_millis("COURIER_RETRY_BASE_MS", defaults.retry_base)?,
            retry_max: env_millis("COURIER_RETRY_MAX_MS", defaults.retry_max)?,
            cleanup_interval: env_millis("COURIER_CLEANUP_INTERVAL_MS", defaults.cleanup_interval)?,
            retention: env_millis("COURIER_RETENTION_MS", defaults.retention)?,
            cleanup_default_max_age: env_millis(
                "COURIER_CLEANUP_DEFAULT_MAX_AGE_MS",
                defaults.cleanup_default_max_age,
            )?,
            autostart: matches!(
                env_or("COURIER_WORKER_AUTOSTART", "false").as_str(),
                "1" | "true" | "yes"
            ),
        };

        if queue.interval.is_zero() {
            return Err("COURIER_QUEUE_INTERVAL_MS must be greater than zero".to_string());
        }
        if queue.cleanup_interval.is_zero() {
            return Err("COURIER_CLEANUP_INTERVAL_MS must be greater than zero".to_string());
        }
        if queue.batch_limit == 0 {
            return Err("COURIER_QUEUE_BATCH_LIMIT must be greater than zero".to_string());
        }
        if queue.default_max_attempts == 0 {
            return Err("COURIER_QUEUE_MAX_ATTEMPTS must be greater than zero".to_string());
        }

        let smtp = match (
            std::env::var("COURIER_SMTP_HOST").ok(),
            std::env::var("COURIER_SMTP_PORT").ok(),
            std::env::var("COURIER_SMTP_USER").ok(),
            std::env::var("COURIER_SMTP_PASS").ok(),
            std::env::var("COURIER_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid COURIER_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
            }),
            _ => None,
        };

        let delivery_timeout =
            Duration::from_secs(env_parse("COURIER_DELIVERY_TIMEOUT_SECS", 30u64)?);

        Ok(Config {
            database_url,
            jwt_secret,
            host,
            port,
            log_level,
            queue,
            smtp,
            delivery_timeout,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| format!("Invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, String> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parse(key, default_ms).map(Duration::from_millis)
}
