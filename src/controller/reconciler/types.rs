//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::constants::{ERROR_BACKOFF_MAX_SECS, ERROR_BACKOFF_MIN_SECS};
use crate::controller::backoff::FibonacciBackoff;
use crate::roles::{PassError, PassSettings, RetryPolicy};
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
    #[error("Reconcile pass aborted: {0}")]
    Pass(#[from] PassError),
    #[error("Cannot reach primary of cluster {cluster}: {reason}")]
    PrimaryUnavailable { cluster: String, reason: String },
}

/// Backoff state for a specific cluster
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(
                Duration::from_secs(ERROR_BACKOFF_MIN_SECS),
                Duration::from_secs(ERROR_BACKOFF_MAX_SECS),
            ),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconcile
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    // Backoff state per cluster (identified by namespace/name)
    // Owned by the error policy, reset here after a successful pass
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Settings of a single pass derived from the controller configuration
    #[must_use]
    pub fn pass_settings(&self) -> PassSettings {
        pass_settings(&self.config)
    }

    /// Forget the error history of a cluster after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                if let Some(state) = states.get_mut(resource_key) {
                    state.reset();
                }
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }
}

/// Build pass settings from configuration
#[must_use]
pub fn pass_settings(config: &ControllerConfig) -> PassSettings {
    PassSettings {
        deadline: config.pass_deadline(),
        retry: RetryPolicy::new(config.retry_attempts, config.retry_step()),
        reserved_roles: config.reserved_roles.clone(),
    }
}
