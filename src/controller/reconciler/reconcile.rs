//! # Reconciliation Logic
//!
//! One managed roles pass for one `Cluster`.
//!
//! 1. Validate `spec.managed.roles`
//! 2. Connect to the primary with the superuser secret
//! 3. Run the pass (observe, resolve secrets, diff, apply)
//! 4. Publish `status.managedRolesStatus`
//! 5. Requeue: soon after transient failures, otherwise after the interval
//!
//! Errors returned from here are pass-level (primary unreachable, catalogue
//! unreadable, status not writable) and are handled by the error policy.

use crate::config::ControllerConfig;
use crate::controller::reconciler::primary::connect_primary;
use crate::controller::reconciler::status::publish_status;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::reconciler::validation::validate_managed_roles;
use crate::crd::{Cluster, ManagedRolesStatus, RolePhase};
use crate::observability::metrics;
use crate::roles::{run_pass, KubeSecretStore, PassInput, PassReport};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Reconcile the managed roles of one cluster
///
/// # Errors
/// `ReconcilerError` when the pass could not run or its status could not be
/// written. Per-role failures are reported in the status instead.
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let span = tracing::info_span!(
        "reconcile",
        cluster.name = name.as_str(),
        cluster.namespace = namespace.as_str()
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = reconcile_internal(&cluster, &ctx, &name, &namespace).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        if result.is_ok() {
            ctx.reset_backoff(&format!("{namespace}/{name}"));
        }
        result
    }
    .instrument(span)
    .await
}

async fn reconcile_internal(
    cluster: &Cluster,
    ctx: &Reconciler,
    name: &str,
    namespace: &str,
) -> Result<Action, ReconcilerError> {
    let declared_roles = cluster.managed_roles();
    let has_previous_status = cluster
        .status
        .as_ref()
        .is_some_and(|status| status.managed_roles_status.is_some());
    if declared_roles.is_empty() && !has_previous_status {
        debug!("No managed roles declared, nothing to reconcile");
        return Ok(Action::await_change());
    }

    let validated = validate_managed_roles(declared_roles);
    for (role, reason) in &validated.invalid {
        warn!(role = role.as_str(), reason = reason.as_str(), "Invalid managed role");
    }
    let declared: BTreeSet<String> = declared_roles.iter().map(|role| role.name.clone()).collect();
    let password_hints = cluster.password_hints();

    let secrets = KubeSecretStore::new(ctx.client.clone(), namespace);
    let mut catalog = connect_primary(
        &secrets,
        &cluster.superuser_secret_name(name),
        name,
        namespace,
        &ctx.config,
    )
    .await?;

    let pass = run_pass(
        &mut catalog,
        &secrets,
        PassInput {
            specs: &validated.specs,
            invalid: &validated.invalid,
            password_hints: &password_hints,
        },
        &ctx.pass_settings(),
    )
    .await;
    catalog.close().await;

    let clusters: Api<Cluster> = Api::namespaced(ctx.client.clone(), namespace);
    let refresh_after = chrono::TimeDelta::from_std(ctx.config.reconcile_interval())
        .unwrap_or(chrono::TimeDelta::MAX);
    let report = match pass {
        Ok(report) => report,
        Err(error) => {
            // Keep the password hints of alters committed before the abort
            if let Some(partial) = error.partial_report() {
                if let Err(status_error) =
                    publish_status(&clusters, name, partial, &declared, refresh_after).await
                {
                    warn!(error = %status_error, "Failed to record partial pass in status");
                }
            }
            return Err(error.into());
        }
    };

    let status = publish_status(&clusters, name, &report, &declared, refresh_after).await?;
    record_phase_gauges(namespace, name, &status);

    info!(
        applied = report.applied,
        reconciled = status.reconciled_count,
        failed = report.failures().count(),
        complete = report.complete,
        "Managed roles pass finished"
    );

    let requeue = requeue_after(&report, &ctx.config);
    debug!(requeue_secs = requeue.as_secs(), "Scheduling next pass");
    Ok(Action::requeue(requeue))
}

/// Delay before the next pass of a cluster
#[must_use]
pub fn requeue_after(report: &PassReport, config: &ControllerConfig) -> Duration {
    if report.transient {
        config.transient_requeue()
    } else {
        config.reconcile_interval()
    }
}

fn record_phase_gauges(namespace: &str, cluster: &str, status: &ManagedRolesStatus) {
    for phase in RolePhase::ALL {
        let count = status.by_status.get(&phase).map_or(0, Vec::len);
        metrics::set_roles_in_phase(namespace, cluster, phase.as_str(), count);
    }
}
