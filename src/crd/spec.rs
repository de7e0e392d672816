//! # Cluster Spec
//!
//! The subset of the `Cluster` resource the managed roles controller reads.
//!
//! Only `spec.managed` and `spec.superuserSecret` are modelled. Every other
//! field of the cluster is owned by the instance manager and passes through
//! untouched.

use serde::{Deserialize, Serialize};

/// PostgreSQL Cluster Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: postgresql.cnpg.io/v1
/// kind: Cluster
/// metadata:
///   name: cluster-example
///   namespace: default
/// spec:
///   instances: 3
///   managed:
///     roles:
///       - name: dante
///         ensure: present
///         comment: Dante Alighieri
///         login: true
///         createdb: true
///         connectionLimit: 4
///         passwordSecret:
///           name: cluster-example-dante
///       - name: new_role
///         inRoles:
///           - dante
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Cluster",
    group = "postgresql.cnpg.io",
    version = "v1",
    namespaced,
    status = "crate::crd::ClusterStatus",
    printcolumn = r#"{"name":"Reconciled Roles", "type":"integer", "jsonPath":".status.managedRolesStatus.reconciledCount"}, {"name":"Last Role Sync", "type":"string", "jsonPath":".status.managedRolesStatus.lastSuccessfulReconcile"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Database roles managed by the controller
    #[serde(default)]
    pub managed: Option<ManagedConfiguration>,
    /// Secret holding the superuser credentials
    /// Default: `<cluster>-superuser`
    #[serde(default)]
    pub superuser_secret: Option<crate::crd::LocalObjectReference>,
}

/// Resources managed by the controller inside the database
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedConfiguration {
    /// Roles that should exist (or not) in the cluster
    #[serde(default)]
    pub roles: Vec<crate::crd::RoleConfiguration>,
}

impl Cluster {
    /// Declared managed roles, empty when `spec.managed` is unset
    #[must_use]
    pub fn managed_roles(&self) -> &[crate::crd::RoleConfiguration] {
        self.spec
            .managed
            .as_ref()
            .map_or(&[], |managed| managed.roles.as_slice())
    }

    /// Name of the secret holding the superuser credentials
    #[must_use]
    pub fn superuser_secret_name(&self, cluster_name: &str) -> String {
        self.spec.superuser_secret.as_ref().map_or_else(
            || format!("{cluster_name}{}", crate::constants::SUPERUSER_SECRET_SUFFIX),
            |secret| secret.name.clone(),
        )
    }

    /// Role name to secret name for every role that takes its password from a secret
    pub fn referenced_password_secrets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.managed_roles().iter().filter_map(|role| {
            role.password_secret
                .as_ref()
                .map(|secret| (role.name.as_str(), secret.name.as_str()))
        })
    }

    /// Password hints recorded by the previous pass
    #[must_use]
    pub fn password_hints(&self) -> std::collections::BTreeMap<String, String> {
        self.status
            .as_ref()
            .and_then(|status| status.managed_roles_status.as_ref())
            .map(|managed| {
                managed
                    .password_status
                    .iter()
                    .map(|(role, state)| (role.clone(), state.resource_version.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}

/// Default connection limit (unlimited)
pub fn default_connection_limit() -> i64 {
    -1
}
