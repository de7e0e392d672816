//! # Managed Roles Controller
//!
//! Kubernetes controller that reconciles the PostgreSQL roles declared at
//! `spec.managed.roles` of `Cluster` resources.
//!
//! ## Overview
//!
//! For every cluster the controller:
//!
//! 1. **Observes the primary** - lists roles, attributes, comments and memberships
//! 2. **Resolves passwords** - reads role secrets (`username`/`password`)
//! 3. **Plans** - computes creates, alters, grants, revokes and drops
//! 4. **Applies** - one statement per action, failures isolated per role
//! 5. **Reports** - writes `status.managedRolesStatus`
//!
//! Prometheus metrics and probes are served on `METRICS_PORT`.

use anyhow::Result;
use managed_roles_controller::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.clusters,
        init.secrets,
        init.reconciler,
        init.server_state,
    )
    .await
}
