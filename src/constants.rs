//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager name used for status patches
pub const FIELD_MANAGER: &str = "managed-roles-controller";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval after a clean pass (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

/// Default requeue interval after a pass that hit transient failures (seconds)
pub const DEFAULT_TRANSIENT_REQUEUE_SECS: u64 = 5;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default exponential backoff starting value for watch restarts (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch restarts (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default deadline for a single reconcile pass (seconds)
pub const DEFAULT_PASS_DEADLINE_SECS: u64 = 60;

/// Attempts made for a transient secret or catalog failure within one pass
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff step between in-pass retries (milliseconds)
pub const DEFAULT_RETRY_STEP_MS: u64 = 200;

/// Attempts made to publish status before giving up on the pass
pub const STATUS_WRITE_ATTEMPTS: u32 = 3;

/// Default PostgreSQL port of the `-rw` service
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Database used for catalogue queries
pub const DEFAULT_POSTGRES_DATABASE: &str = "postgres";

/// Default SSL mode when connecting to the primary
pub const DEFAULT_POSTGRES_SSL_MODE: &str = "require";

/// Connect timeout for the primary (seconds)
pub const DEFAULT_POSTGRES_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Roles the operator itself relies on; never managed even if declared
pub const DEFAULT_RESERVED_ROLES: &[&str] = &["postgres", "streaming_replica"];

/// OID PostgreSQL assigns to the bootstrap superuser
pub const BOOTSTRAP_SUPERUSER_OID: i64 = 10;

/// Prefix of roles predefined by PostgreSQL
pub const SYSTEM_ROLE_PREFIX: &str = "pg_";

/// Maximum identifier length in bytes (NAMEDATALEN - 1)
pub const MAX_ROLE_NAME_BYTES: usize = 63;

/// Suffix of the read-write service pointing at the primary
pub const PRIMARY_SERVICE_SUFFIX: &str = "-rw";

/// Suffix of the default superuser secret for a cluster
pub const SUPERUSER_SECRET_SUFFIX: &str = "-superuser";

/// Secret key holding the role name
pub const SECRET_USERNAME_KEY: &str = "username";

/// Secret key holding the password
pub const SECRET_PASSWORD_KEY: &str = "password";

/// First requeue delay after a failed pass (seconds)
pub const ERROR_BACKOFF_MIN_SECS: u64 = 30;

/// Largest requeue delay after repeated failed passes (seconds)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 600;
