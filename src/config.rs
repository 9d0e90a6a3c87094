// src/config.rs

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;

use crate::session::{RetryPolicy, SessionRegistry, SessionSettings, SeverityThreshold};

#[derive(Debug, Clone)]
pub struct Config {
    /// When unset, the in-memory store with the sample exam is used.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub high_severity_threshold: usize,
    pub low_time_warning_secs: u64,
    pub recent_violations_limit: usize,
    pub persist_max_attempts: u32,
    pub persist_timeout_ms: u64,
    pub persist_backoff_ms: u64,
    /// How long a stored session stays queryable before it is evicted.
    pub session_linger_secs: u64,
}

/// Falls back to `default` when the variable is unset or unparsable.
/// Install the tracing subscriber before calling so the warning is kept.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        Self {
            database_url,
            jwt_secret,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000".to_string()),
            high_severity_threshold: env_or(
                "HIGH_SEVERITY_THRESHOLD",
                SeverityThreshold::DEFAULT_HIGH_THRESHOLD,
            ),
            low_time_warning_secs: env_or("LOW_TIME_WARNING_SECS", 300),
            recent_violations_limit: env_or("RECENT_VIOLATIONS_LIMIT", 10),
            persist_max_attempts: env_or("PERSIST_MAX_ATTEMPTS", 3),
            persist_timeout_ms: env_or("PERSIST_TIMEOUT_MS", 5000),
            persist_backoff_ms: env_or("PERSIST_BACKOFF_MS", 500),
            session_linger_secs: env_or("SESSION_LINGER_SECS", 60),
        }
    }

    /// Configuration for tests and local runs: in-memory store, reference defaults.
    pub fn local(jwt_secret: impl Into<String>) -> Self {
        let defaults = SessionSettings::default();
        Self {
            database_url: None,
            jwt_secret: jwt_secret.into(),
            bind_addr: "127.0.0.1:0".to_string(),
            high_severity_threshold: SeverityThreshold::DEFAULT_HIGH_THRESHOLD,
            low_time_warning_secs: defaults.low_time_warning.as_secs(),
            recent_violations_limit: defaults.recent_violations_limit,
            persist_max_attempts: defaults.persist.max_attempts,
            persist_timeout_ms: 5000,
            persist_backoff_ms: 500,
            session_linger_secs: SessionRegistry::DEFAULT_LINGER.as_secs(),
        }
    }

    pub fn session_linger(&self) -> Duration {
        Duration::from_secs(self.session_linger_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            escalation: Arc::new(SeverityThreshold::high(self.high_severity_threshold)),
            low_time_warning: Duration::from_secs(self.low_time_warning_secs),
            recent_violations_limit: self.recent_violations_limit,
            persist: RetryPolicy {
                max_attempts: self.persist_max_attempts,
                timeout: Duration::from_millis(self.persist_timeout_ms),
                backoff: Duration::from_millis(self.persist_backoff_ms),
            },
        }
    }
}
