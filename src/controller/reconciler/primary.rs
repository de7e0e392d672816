//! # Primary Connector
//!
//! Opens the per-pass connection to the primary of a cluster through its
//! `-rw` service, authenticating with the superuser secret.

use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_POSTGRES_DATABASE, PRIMARY_SERVICE_SUFFIX};
use crate::controller::reconciler::types::ReconcilerError;
use crate::roles::{PostgresCatalog, SecretStore};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use tracing::{debug, warn};

/// Username used when the superuser secret carries only a password
const DEFAULT_SUPERUSER: &str = "postgres";

/// DNS name of the read-write service of a cluster
#[must_use]
pub fn primary_host(cluster: &str, namespace: &str) -> String {
    format!("{cluster}{PRIMARY_SERVICE_SUFFIX}.{namespace}.svc")
}

/// Parse the configured SSL mode, falling back to `require`
#[must_use]
pub fn ssl_mode(value: &str) -> PgSslMode {
    value.trim().parse().unwrap_or_else(|_| {
        warn!(ssl_mode = value, "Unknown PostgreSQL SSL mode, using require");
        PgSslMode::Require
    })
}

/// Connect to the primary of `cluster`
///
/// # Errors
/// `PrimaryUnavailable` when the superuser secret cannot be read, or the
/// connection fails or does not complete within the connect timeout.
pub async fn connect_primary<S>(
    secrets: &S,
    superuser_secret: &str,
    cluster: &str,
    namespace: &str,
    config: &ControllerConfig,
) -> Result<PostgresCatalog, ReconcilerError>
where
    S: SecretStore + ?Sized,
{
    let unavailable = |reason: String| ReconcilerError::PrimaryUnavailable {
        cluster: cluster.to_string(),
        reason,
    };

    let credentials = secrets
        .read(superuser_secret)
        .await
        .map_err(|e| unavailable(format!("superuser credentials: {e}")))?;

    let database = if config.postgres_database.is_empty() {
        DEFAULT_POSTGRES_DATABASE
    } else {
        config.postgres_database.as_str()
    };
    let host = primary_host(cluster, namespace);
    let options = PgConnectOptions::new()
        .host(&host)
        .port(config.postgres_port)
        .database(database)
        .username(credentials.username.as_deref().unwrap_or(DEFAULT_SUPERUSER))
        .password(credentials.password.expose())
        .ssl_mode(ssl_mode(&config.postgres_ssl_mode))
        .application_name(crate::constants::FIELD_MANAGER);

    debug!(host = host.as_str(), port = config.postgres_port, "Connecting to primary");
    match tokio::time::timeout(
        config.postgres_connect_timeout(),
        PostgresCatalog::connect(&options),
    )
    .await
    {
        Ok(Ok(catalog)) => Ok(catalog),
        Ok(Err(e)) => Err(unavailable(e.to_string())),
        Err(_elapsed) => Err(unavailable(format!(
            "connection not established within {}s",
            config.postgres_connect_timeout_secs
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_host() {
        assert_eq!(primary_host("cluster-example", "db"), "cluster-example-rw.db.svc");
    }

    #[test]
    fn test_ssl_mode_parsing() {
        assert!(matches!(ssl_mode("disable"), PgSslMode::Disable));
        assert!(matches!(ssl_mode("verify-full"), PgSslMode::VerifyFull));
        assert!(matches!(ssl_mode(" prefer "), PgSslMode::Prefer));
        assert!(matches!(ssl_mode("bogus"), PgSslMode::Require));
    }
}
