//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// HTTP port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Requeue interval after a pass without transient failures (seconds)
    pub reconcile_interval_secs: u64,
    /// Requeue interval after a pass with transient failures (seconds)
    pub transient_requeue_secs: u64,
    /// Reconciliation error requeue interval (seconds)
    /// Used when the backoff state cannot be read
    pub reconciliation_error_requeue_secs: u64,
    /// Exponential backoff starting value for watch restarts (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for watch restarts (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Deadline of a single reconcile pass (seconds)
    /// No new action starts once it expires
    pub pass_deadline_secs: u64,
    /// Attempts for transient secret and catalog failures within a pass
    pub retry_attempts: u32,
    /// Linear backoff step between in-pass retries (milliseconds)
    pub retry_step_ms: u64,
    /// Port of the `-rw` service
    pub postgres_port: u16,
    /// Database the controller connects to
    pub postgres_database: String,
    /// SSL mode (disable, prefer, require, verify-ca, verify-full)
    pub postgres_ssl_mode: String,
    /// Connect timeout for the primary (seconds)
    pub postgres_connect_timeout_secs: u64,
    /// Role names that are never managed even if declared
    pub reserved_roles: Vec<String>,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Maximum concurrent reconciliations across clusters
    pub max_concurrent_reconciliations: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            transient_requeue_secs: DEFAULT_TRANSIENT_REQUEUE_SECS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            pass_deadline_secs: DEFAULT_PASS_DEADLINE_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_step_ms: DEFAULT_RETRY_STEP_MS,
            postgres_port: DEFAULT_POSTGRES_PORT,
            postgres_database: DEFAULT_POSTGRES_DATABASE.to_string(),
            postgres_ssl_mode: DEFAULT_POSTGRES_SSL_MODE.to_string(),
            postgres_connect_timeout_secs: DEFAULT_POSTGRES_CONNECT_TIMEOUT_SECS,
            reserved_roles: DEFAULT_RESERVED_ROLES
                .iter()
                .map(|r| (*r).to_string())
                .collect(),
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
            max_concurrent_reconciliations: 10,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` is a thin wrapper; tests pass a map instead of mutating
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            metrics_port: parsed(&lookup, "METRICS_PORT", defaults.metrics_port),
            reconcile_interval_secs: parsed(
                &lookup,
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            ),
            transient_requeue_secs: parsed(
                &lookup,
                "TRANSIENT_REQUEUE_SECS",
                defaults.transient_requeue_secs,
            ),
            reconciliation_error_requeue_secs: parsed(
                &lookup,
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                defaults.reconciliation_error_requeue_secs,
            ),
            backoff_start_ms: parsed(&lookup, "BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: parsed(&lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            watch_restart_delay_secs: parsed(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_restart_delay_after_end_secs: parsed(
                &lookup,
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                defaults.watch_restart_delay_after_end_secs,
            ),
            pass_deadline_secs: parsed(&lookup, "PASS_DEADLINE_SECS", defaults.pass_deadline_secs),
            retry_attempts: parsed(&lookup, "RETRY_ATTEMPTS", defaults.retry_attempts).max(1),
            retry_step_ms: parsed(&lookup, "RETRY_STEP_MS", defaults.retry_step_ms),
            postgres_port: parsed(&lookup, "POSTGRES_PORT", defaults.postgres_port),
            postgres_database: lookup("POSTGRES_DATABASE").unwrap_or(defaults.postgres_database),
            postgres_ssl_mode: lookup("POSTGRES_SSL_MODE").unwrap_or(defaults.postgres_ssl_mode),
            postgres_connect_timeout_secs: parsed(
                &lookup,
                "POSTGRES_CONNECT_TIMEOUT_SECS",
                defaults.postgres_connect_timeout_secs,
            ),
            reserved_roles: lookup("RESERVED_ROLES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.reserved_roles),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT").unwrap_or(defaults.log_format),
            max_concurrent_reconciliations: parsed(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
        }
    }

    /// Get requeue duration after a clean pass
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Get requeue duration after a pass with transient failures
    #[must_use]
    pub fn transient_requeue(&self) -> Duration {
        Duration::from_secs(self.transient_requeue_secs)
    }

    /// Get reconciliation error requeue duration
    #[must_use]
    pub fn reconciliation_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Get pass deadline duration
    #[must_use]
    pub fn pass_deadline(&self) -> Duration {
        Duration::from_secs(self.pass_deadline_secs)
    }

    /// Get step of the in-pass linear retry backoff
    #[must_use]
    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }

    /// Get connect timeout for the primary
    #[must_use]
    pub fn postgres_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.postgres_connect_timeout_secs)
    }
}

/// Read a value and parse it, falling back to the default on absence or parse failure
fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
