//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, probe server
//! and Kubernetes client.

use crate::config::ControllerConfig;
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Cluster;
use crate::observability;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    /// Clusters across all namespaces
    pub clusters: Api<Cluster>,
    /// Secrets across all namespaces, watched for password rotations
    pub secrets: Api<Secret>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Startup summary of existing clusters
///
/// # Errors
/// Fails when metrics cannot be registered, the server does not come up or
/// no Kubernetes client can be built.
pub async fn initialize() -> Result<InitializationResult> {
    let config = ControllerConfig::from_env();
    init_tracing(&config);

    // Must happen before any TLS connection (Kubernetes API or PostgreSQL)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Managed Roles Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let clusters: Api<Cluster> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());

    log_existing_clusters(&clusters).await;

    let reconciler = Arc::new(Reconciler::new(client.clone(), config));
    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        clusters,
        secrets,
        reconciler,
        server_state,
    })
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `LOG_LEVEL`. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing(config: &ControllerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "managed_roles_controller={}",
            config.log_level.to_lowercase()
        ))
    });

    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber init returned error (may already be initialized): {}", e);
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Log the clusters found at startup, grouped by namespace
///
/// The controller's initial list reconciles them; this only surfaces RBAC
/// or CRD problems early.
async fn log_existing_clusters(clusters: &Api<Cluster>) {
    match clusters.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            let mut with_roles = 0;
            for cluster in &list.items {
                if !cluster.managed_roles().is_empty() {
                    with_roles += 1;
                }
                by_namespace
                    .entry(cluster.namespace().unwrap_or_else(|| "default".to_string()))
                    .or_default()
                    .push(cluster.name_any());
            }
            info!(
                "Found {} clusters ({} with managed roles) in {} namespaces",
                list.items.len(),
                with_roles,
                by_namespace.len()
            );
            for (namespace, names) in &by_namespace {
                info!("  {}: {}", namespace, names.join(", "));
            }
        }
        Err(e) => {
            warn!(
                "Cannot list Cluster resources: {}. Verify the CRD is installed and RBAC allows listing clusters.",
                e
            );
        }
    }
}
