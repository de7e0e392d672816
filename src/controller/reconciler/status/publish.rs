//! # Status Publishing
//!
//! Writes the merged managed roles status with optimistic concurrency.

use crate::constants::{FIELD_MANAGER, STATUS_WRITE_ATTEMPTS};
use crate::controller::reconciler::status::aggregate::merge_status;
use crate::crd::{Cluster, ManagedRolesStatus};
use crate::observability::metrics;
use crate::roles::PassReport;
use anyhow::{Context, Result};
use kube::api::{Patch, PatchParams};
use kube::Api;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Merge the report into the current status and write it
///
/// The cluster is re-read before every attempt. A write rejected because
/// the resource version moved (409) is merged again, up to
/// `STATUS_WRITE_ATTEMPTS` times. An unchanged status is not written.
pub async fn publish_status(
    api: &Api<Cluster>,
    name: &str,
    report: &PassReport,
    declared: &BTreeSet<String>,
    refresh_after: chrono::Duration,
) -> Result<ManagedRolesStatus> {
    for attempt in 1..=STATUS_WRITE_ATTEMPTS {
        let cluster = api
            .get_status(name)
            .await
            .with_context(|| format!("Failed to read status of cluster {name}"))?;
        let previous = cluster
            .status
            .as_ref()
            .and_then(|status| status.managed_roles_status.as_ref());
        let merged = merge_status(previous, report, declared, chrono::Utc::now(), refresh_after);

        if previous == Some(&merged) {
            debug!(cluster = name, "Managed roles status unchanged, skipping update");
            return Ok(merged);
        }

        let patch = status_patch(
            cluster.metadata.resource_version.as_deref(),
            previous,
            &merged,
        )?;
        match api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(merged),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                metrics::increment_status_conflicts();
                warn!(
                    cluster = name,
                    attempt = attempt,
                    "Cluster changed while writing status, merging again"
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to update status of cluster {name}"));
            }
        }
    }

    Err(anyhow::anyhow!(
        "Cluster {name} kept changing, status not written after {STATUS_WRITE_ATTEMPTS} attempts"
    ))
}

/// Build the merge patch for the status subresource
///
/// Merge patches only add or replace keys, so map entries that disappeared
/// since `previous` are sent as `null`.
pub fn status_patch(
    resource_version: Option<&str>,
    previous: Option<&ManagedRolesStatus>,
    merged: &ManagedRolesStatus,
) -> Result<Value> {
    let previous_value = previous
        .map(serde_json::to_value)
        .transpose()
        .context("Failed to serialize previous status")?
        .unwrap_or(Value::Null);
    let merged_value = serde_json::to_value(merged).context("Failed to serialize status")?;

    let mut patch = serde_json::json!({
        "status": {
            "managedRolesStatus": with_removals(&previous_value, merged_value),
        }
    });
    if let Some(resource_version) = resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": resource_version });
    }
    Ok(patch)
}

fn with_removals(previous: &Value, next: Value) -> Value {
    match (previous, next) {
        (Value::Object(previous), Value::Object(mut next)) => {
            for (key, old) in previous {
                match next.remove(key) {
                    Some(new) => {
                        next.insert(key.clone(), with_removals(old, new));
                    }
                    None => {
                        next.insert(key.clone(), Value::Null);
                    }
                }
            }
            Value::Object(next)
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PasswordState, RolePhase};

    #[test]
    fn test_patch_carries_resource_version() {
        let patch = status_patch(Some("123"), None, &ManagedRolesStatus::default()).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "123");
        assert_eq!(patch["status"]["managedRolesStatus"]["reconciledCount"], 0);
    }

    #[test]
    fn test_removed_map_entries_become_null() {
        let mut previous = ManagedRolesStatus::default();
        previous
            .by_status
            .insert(RolePhase::Failed, vec!["dante".to_string()]);
        previous
            .cannot_reconcile
            .insert("dante".to_string(), vec!["boom".to_string()]);
        previous.password_status.insert(
            "dante".to_string(),
            PasswordState {
                resource_version: "1".to_string(),
            },
        );

        let mut merged = ManagedRolesStatus::default();
        merged
            .by_status
            .insert(RolePhase::Reconciled, vec!["dante".to_string()]);
        merged.password_status.insert(
            "dante".to_string(),
            PasswordState {
                resource_version: "2".to_string(),
            },
        );

        let patch = status_patch(None, Some(&previous), &merged).unwrap();
        let status = &patch["status"]["managedRolesStatus"];
        assert_eq!(status["byStatus"]["failed"], Value::Null);
        assert_eq!(status["byStatus"]["reconciled"][0], "dante");
        assert_eq!(status["cannotReconcile"]["dante"], Value::Null);
        assert_eq!(status["passwordStatus"]["dante"]["resourceVersion"], "2");
        assert!(patch.get("metadata").is_none());
    }
}
