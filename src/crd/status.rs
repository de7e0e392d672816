//! # Cluster Status
//!
//! Status types for tracking managed role reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of the Cluster resource
///
/// Only the part written by this controller is modelled; the status merge
/// patch leaves every other field alone.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Outcome of the last managed roles reconciliation
    #[serde(default)]
    pub managed_roles_status: Option<ManagedRolesStatus>,
}

/// Aggregate state of the managed roles of a cluster
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedRolesStatus {
    /// Role names grouped by phase, sorted
    #[serde(default)]
    pub by_status: BTreeMap<RolePhase, Vec<String>>,
    /// Roles that could not be reconciled with the reasons
    #[serde(default)]
    pub cannot_reconcile: BTreeMap<String, Vec<String>>,
    /// Per-role records, sorted by name
    #[serde(default)]
    pub roles: Vec<RoleStatus>,
    /// Number of roles in the `reconciled` phase
    #[serde(default)]
    pub reconciled_count: i32,
    /// End of the last pass that completed without failures (RFC3339)
    #[serde(default)]
    pub last_successful_reconcile: Option<String>,
    /// Secret resource version last applied as each role's password
    #[serde(default)]
    pub password_status: BTreeMap<String, PasswordState>,
}

/// Outcome of a single managed role
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    /// Name of the role
    pub name: String,
    /// Phase reached by the last pass that handled the role
    pub phase: RolePhase,
    /// When the phase last changed (RFC3339)
    pub last_transition_time: String,
    /// Details for `failed` and `reserved`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Phase of a role
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RolePhase {
    /// Database matches the declaration
    Reconciled,
    /// Role cannot be changed by the controller (system role or blocked drop)
    Reserved,
    /// Role exists in the database but is not declared
    Ignored,
    /// Last attempt failed, retried on a later pass
    Failed,
}

impl RolePhase {
    pub const ALL: [RolePhase; 4] = [
        RolePhase::Reconciled,
        RolePhase::Reserved,
        RolePhase::Ignored,
        RolePhase::Failed,
    ];

    /// Lower case name as written to the status
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RolePhase::Reconciled => "reconciled",
            RolePhase::Reserved => "reserved",
            RolePhase::Ignored => "ignored",
            RolePhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RolePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Password applied to a role
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordState {
    /// Resource version of the secret whose password was applied
    pub resource_version: String,
}
