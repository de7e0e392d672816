//! # Role Configuration
//!
//! One entry of `spec.managed.roles`.

use serde::{Deserialize, Serialize};

/// Desired state of a database role
///
/// Omitted attributes take PostgreSQL's own defaults, so an entry with
/// only a `name` describes `CREATE ROLE name` with nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfiguration {
    /// Name of the role (case sensitive)
    pub name: String,
    /// Whether the role should exist
    /// Default: present
    #[serde(default)]
    pub ensure: EnsureOption,
    /// Description stored with `COMMENT ON ROLE`
    /// An empty string resets the comment to NULL
    #[serde(default)]
    pub comment: Option<String>,
    /// Role may log in
    #[serde(default)]
    pub login: bool,
    /// Role bypasses all permission checks
    #[serde(default)]
    pub superuser: bool,
    /// Role may create databases
    #[serde(default, rename = "createdb")]
    pub create_db: bool,
    /// Role may create other roles
    #[serde(default, rename = "createrole")]
    pub create_role: bool,
    /// Role inherits the privileges of the roles it is a member of
    /// Default: true
    #[serde(default = "crate::crd::default_true")]
    pub inherit: bool,
    /// Role may initiate streaming replication
    #[serde(default)]
    pub replication: bool,
    /// Role bypasses row level security
    #[serde(default, rename = "bypassrls")]
    pub bypass_rls: bool,
    /// Concurrent connections allowed for the role, -1 for unlimited
    /// Default: -1
    #[serde(default = "crate::crd::default_connection_limit")]
    pub connection_limit: i64,
    /// Roles this role is a member of
    #[serde(default)]
    pub in_roles: Vec<String>,
    /// Secret holding the password (keys `username` and `password`)
    #[serde(default)]
    pub password_secret: Option<crate::crd::LocalObjectReference>,
    /// Set the password to NULL and ignore any secret
    #[serde(default)]
    pub disable_password: bool,
    /// Date and time after which the password is no longer valid (RFC 3339)
    /// When omitted the password never expires
    #[serde(default)]
    pub valid_until: Option<String>,
}

impl RoleConfiguration {
    /// A role entry with every attribute at its default
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: EnsureOption::Present,
            comment: None,
            login: false,
            superuser: false,
            create_db: false,
            create_role: false,
            inherit: true,
            replication: false,
            bypass_rls: false,
            connection_limit: -1,
            in_roles: Vec::new(),
            password_secret: None,
            disable_password: false,
            valid_until: None,
        }
    }
}

/// Disposition of a managed role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EnsureOption {
    /// The role must exist
    #[default]
    Present,
    /// The role must not exist
    Absent,
}

/// Reference to an object in the same namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct LocalObjectReference {
    /// Name of the referent
    pub name: String,
}
