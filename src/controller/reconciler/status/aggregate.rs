//! # Status Aggregation
//!
//! Pure merge of a pass report into the previous managed roles status.

use crate::crd::{ManagedRolesStatus, PasswordState, RolePhase, RoleStatus};
use crate::roles::PassReport;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Merge a pass report into the previous status
///
/// - Transition times survive when a role keeps its phase.
/// - Declared roles the pass did not reach keep their previous record.
/// - `lastSuccessfulReconcile` moves only for a complete pass without
///   failures, and only when the pass applied statements, a phase changed
///   or the stored time is older than `refresh_after`. A pass with nothing
///   to do then leaves the status as it was, which keeps status updates
///   from triggering endless passes.
#[must_use]
pub fn merge_status(
    previous: Option<&ManagedRolesStatus>,
    report: &PassReport,
    declared: &BTreeSet<String>,
    now: DateTime<Utc>,
    refresh_after: chrono::Duration,
) -> ManagedRolesStatus {
    let now_text = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let previous_records: BTreeMap<&str, &RoleStatus> = previous
        .map(|status| {
            status
                .roles
                .iter()
                .map(|record| (record.name.as_str(), record))
                .collect()
        })
        .unwrap_or_default();

    let record = |name: &str, phase: RolePhase, message: Option<String>| {
        let last_transition_time = match previous_records.get(name) {
            Some(previous) if previous.phase == phase => previous.last_transition_time.clone(),
            _ => now_text.clone(),
        };
        RoleStatus {
            name: name.to_string(),
            phase,
            last_transition_time,
            message,
        }
    };

    let mut records: BTreeMap<String, RoleStatus> = BTreeMap::new();
    for (name, outcome) in &report.outcomes {
        records.insert(
            name.clone(),
            record(name, outcome.phase, outcome.message.clone()),
        );
    }
    for name in &report.unmanaged {
        records
            .entry(name.clone())
            .or_insert_with(|| record(name, RolePhase::Ignored, None));
    }
    for name in declared {
        if !records.contains_key(name) {
            if let Some(previous) = previous_records.get(name.as_str()) {
                records.insert(name.clone(), (*previous).clone());
            }
        }
    }

    let mut by_status: BTreeMap<RolePhase, Vec<String>> = BTreeMap::new();
    let mut cannot_reconcile: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records.values() {
        by_status
            .entry(record.phase)
            .or_default()
            .push(record.name.clone());
        if matches!(record.phase, RolePhase::Failed | RolePhase::Reserved) {
            if let Some(message) = &record.message {
                cannot_reconcile.insert(record.name.clone(), vec![message.clone()]);
            }
        }
    }
    let reconciled_count = by_status
        .get(&RolePhase::Reconciled)
        .map_or(0, |names| i32::try_from(names.len()).unwrap_or(i32::MAX));

    let mut password_status = previous
        .map(|status| status.password_status.clone())
        .unwrap_or_default();
    for (name, version) in &report.password_versions {
        match version {
            Some(resource_version) => {
                password_status.insert(
                    name.clone(),
                    PasswordState {
                        resource_version: resource_version.clone(),
                    },
                );
            }
            None => {
                password_status.remove(name);
            }
        }
    }
    password_status.retain(|name, _| declared.contains(name));

    let phases_changed = records.len() != previous_records.len()
        || records.values().any(|record| {
            previous_records
                .get(record.name.as_str())
                .is_none_or(|previous| previous.phase != record.phase)
        });
    let previous_success = previous.and_then(|status| status.last_successful_reconcile.clone());
    let stale = previous_success
        .as_deref()
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .is_none_or(|at| now.signed_duration_since(at) >= refresh_after);
    let refresh = report.applied > 0 || phases_changed || stale;
    let last_successful_reconcile = if report.complete && !report.has_failures() && refresh {
        Some(now_text.clone())
    } else {
        previous_success
    };

    ManagedRolesStatus {
        by_status,
        cannot_reconcile,
        roles: records.into_values().collect(),
        reconciled_count,
        last_successful_reconcile,
        password_status,
    }
}
