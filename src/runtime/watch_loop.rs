//! # Watch Loop
//!
//! Controller watch loop over `Cluster` resources. Role secrets are watched
//! as well, so a rotated password is applied without waiting for the
//! reconcile interval.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Cluster;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run the controller watch loop
///
/// Restarts the controller when its stream ends, unless it ended because
/// SIGTERM or SIGINT was received.
///
/// # Errors
/// Currently never fails; the signature leaves room for startup checks.
pub async fn run_watch_loop(
    clusters: Api<Cluster>,
    secrets: Api<Secret>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let config = Arc::clone(&reconciler.config);
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    // Shared so every controller instance of the loop waits on the same signal
    let shutdown = shutdown_signal(Arc::clone(&server_state)).boxed().shared();

    loop {
        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );
        let _watch_guard = watch_span.enter();
        info!("Starting controller watch loop...");

        let controller = Controller::new(clusters.clone(), watcher::Config::default().any_semantic());
        let store = controller.store();
        let backoff = Arc::clone(&backoff_duration_ms);
        let stream_config = Arc::clone(&config);

        controller
            .watches(secrets.clone(), watcher::Config::default(), move |secret: Secret| {
                clusters_for_secret(&store.state(), &secret)
            })
            .with_config(
                controller::Config::default().concurrency(config.max_concurrent_reconciliations),
            )
            .graceful_shutdown_on(shutdown.clone())
            .run(
                reconcile,
                |cluster, error, ctx| handle_reconciliation_error(cluster, error, ctx),
                Arc::clone(&reconciler),
            )
            .filter_map(move |result| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&stream_config);
                async move {
                    match &result {
                        Ok((object, _action)) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(cluster = %object, "watch.event.reconciled");
                            Some(result)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await
                            .map(|()| result)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown.clone() => {}
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Resolves on SIGTERM (sent by Kubernetes) or SIGINT
///
/// Readiness is cleared before the future resolves, so a controller stream
/// ended by it is never restarted.
async fn shutdown_signal(server_state: Arc<ServerState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                return std::future::pending().await;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to install SIGINT handler: {}", e);
                return std::future::pending().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown..."),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return std::future::pending().await;
        }
        info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    server_state.set_ready(false);
}

/// Clusters in the secret's namespace that depend on it
///
/// A cluster depends on a secret when one of its managed roles takes its
/// password from it, or when it holds the superuser credentials.
#[must_use]
pub fn clusters_for_secret(clusters: &[Arc<Cluster>], secret: &Secret) -> Vec<ObjectRef<Cluster>> {
    let secret_name = secret.name_any();
    let secret_namespace = secret.namespace();

    clusters
        .iter()
        .filter(|cluster| cluster.namespace() == secret_namespace)
        .filter(|cluster| {
            cluster.superuser_secret_name(&cluster.name_any()) == secret_name
                || cluster
                    .referenced_password_secrets()
                    .any(|(_, name)| name == secret_name)
        })
        .map(|cluster| ObjectRef::from_obj(cluster.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, LocalObjectReference, ManagedConfiguration, RoleConfiguration};
    use kube::api::ObjectMeta;

    fn cluster(name: &str, namespace: &str, role_secret: Option<&str>) -> Arc<Cluster> {
        let mut role = RoleConfiguration::named("app");
        role.password_secret = role_secret.map(|name| LocalObjectReference {
            name: name.to_string(),
        });
        let mut cluster = Cluster::new(
            name,
            ClusterSpec {
                managed: Some(ManagedConfiguration { roles: vec![role] }),
                ..ClusterSpec::default()
            },
        );
        cluster.metadata.namespace = Some(namespace.to_string());
        Arc::new(cluster)
    }

    fn secret(name: &str, namespace: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[test]
    fn test_role_secret_maps_to_owning_cluster() {
        let clusters = vec![
            cluster("one", "db", Some("app-secret")),
            cluster("two", "db", None),
            cluster("three", "other", Some("app-secret")),
        ];
        let refs = clusters_for_secret(&clusters, &secret("app-secret", "db"));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "one");
    }

    #[test]
    fn test_superuser_secret_maps_to_cluster() {
        let clusters = vec![cluster("one", "db", None)];
        let refs = clusters_for_secret(&clusters, &secret("one-superuser", "db"));
        assert_eq!(refs.len(), 1);
        assert!(clusters_for_secret(&clusters, &secret("unrelated", "db")).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_clears_readiness() {
        let state = Arc::new(ServerState::default());
        state.set_ready(true);
        let mut shutdown = Box::pin(shutdown_signal(Arc::clone(&state)));
        // First poll installs the handlers
        assert!(futures::poll!(&mut shutdown).is_pending());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown)
            .await
            .expect("SIGTERM should end the shutdown future");
        assert!(!state.is_ready());
    }
}
