//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles failed passes and watch stream errors.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Cluster;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle a failed pass with per-cluster Fibonacci backoff
///
/// Backoff state is tracked per cluster so one broken primary does not slow
/// down the others. It is reset by the next successful pass.
pub fn handle_reconciliation_error(
    cluster: Arc<Cluster>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        cluster.name = name.as_str(),
        cluster.namespace = namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Managed roles pass failed for {}/{}: {}", namespace, name, error);
    observability::metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (backoff, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(BackoffState::new);
            state.increment_error();
            (
                Duration::from_secs(state.backoff.next_backoff_seconds()),
                state.error_count,
            )
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default requeue", e);
            (ctx.config.reconciliation_error_requeue_duration(), 0)
        }
    };

    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {})",
        backoff.as_secs(),
        error_count
    );
    Action::requeue(backoff)
}

/// Classification of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify the debug rendering of a controller error
    ///
    /// 404 is checked before 401: a plain text 404 body surfaces as a serde
    /// error that also mentions `WatchFailed`.
    #[must_use]
    pub fn classify(error_string: &str) -> Self {
        let is_not_found = error_string.contains("ObjectNotFound")
            || error_string.contains("404")
            || error_string.contains("not found");
        if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found
        {
            Self::Unauthorized
        } else if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            Self::Expired
        } else if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            Self::Throttled
        } else if is_not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Handle watch stream errors with classification and backoff
///
/// Returns `None` to filter out the error (the stream is restarted) or
/// `Some(())` to keep going.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match WatchErrorKind::classify(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!("Verify the controller can list clusters and secrets:");
            error!("  kubectl auth can-i list clusters.postgresql.cnpg.io --all-namespaces");
            error!("  kubectl auth can-i patch clusters/status --all-namespaces");
            error!("  kubectl auth can-i list secrets --all-namespaces");
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            backoff.store(next_watch_backoff(current_backoff, max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - the cluster may have been deleted or the CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

/// Exponential watch backoff, capped at `max_backoff_ms`
#[must_use]
pub fn next_watch_backoff(current_ms: u64, max_backoff_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            WatchErrorKind::classify("Api(ErrorResponse { code: 401, reason: \"Unauthorized\" })"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            WatchErrorKind::classify("WatchFailed: too old resource version"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            WatchErrorKind::classify("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(WatchErrorKind::classify("ObjectNotFound"), WatchErrorKind::NotFound);
        assert_eq!(WatchErrorKind::classify("connection reset"), WatchErrorKind::Other);
    }

    #[test]
    fn test_not_found_wins_over_unauthorized() {
        assert_eq!(
            WatchErrorKind::classify("WatchFailed: invalid type: integer `404`, Unauthorized"),
            WatchErrorKind::NotFound
        );
    }

    #[test]
    fn test_watch_backoff_doubles_until_cap() {
        assert_eq!(next_watch_backoff(1000, 30_000), 2000);
        assert_eq!(next_watch_backoff(20_000, 30_000), 30_000);
        assert_eq!(next_watch_backoff(u64::MAX, 30_000), 30_000);
    }
}
