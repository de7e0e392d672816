//! # Role Catalog
//!
//! Trait over the live PostgreSQL authentication catalogue, its error
//! classification and the per-pass snapshot of observed roles.

use crate::constants::{BOOTSTRAP_SUPERUSER_OID, SYSTEM_ROLE_PREFIX};
use crate::roles::types::{AttributeDelta, ObservedRole, Password, PasswordAction, RoleSpec};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Catalog failure, classified by SQLSTATE
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Statement rejected by the server (class 42 and unclassified errors)
    #[error("statement rejected: {0}")]
    Syntax(String),
    /// Insufficient privilege (42501)
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Role still owns or is referenced by objects (2BP01)
    #[error("role has dependent objects: {0}")]
    DependencyExists(String),
    /// Network, timeout or server availability problem
    #[error("transient database error: {0}")]
    Transient(String),
    /// Connection cannot be used at all (authentication, closed session)
    #[error("database connection failed: {0}")]
    Fatal(String),
}

impl CatalogError {
    /// Classify a server error by its SQLSTATE code
    #[must_use]
    pub fn from_sqlstate(code: Option<&str>, message: String) -> Self {
        match code {
            Some("42501") => CatalogError::PermissionDenied(message),
            Some("2BP01") => CatalogError::DependencyExists(message),
            Some(code) if code.starts_with("28") => CatalogError::Fatal(message),
            Some(code)
                if ["08", "40", "53", "57"]
                    .iter()
                    .any(|class| code.starts_with(class)) =>
            {
                CatalogError::Transient(message)
            }
            _ => CatalogError::Syntax(message),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

/// Access to the role catalogue of one database
///
/// Every mutation is exactly one SQL statement. Implementations hold a
/// single connection, hence `&mut self`.
#[async_trait]
pub trait RoleCatalog: Send {
    /// All roles of the instance, system roles included
    async fn list(&mut self) -> Result<Vec<ObservedRole>, CatalogError>;

    async fn create(&mut self, spec: &RoleSpec, password: Option<&Password>)
        -> Result<(), CatalogError>;

    async fn alter(
        &mut self,
        name: &str,
        delta: &AttributeDelta,
        password: Option<&PasswordAction>,
    ) -> Result<(), CatalogError>;

    async fn set_comment(&mut self, name: &str, text: &str) -> Result<(), CatalogError>;

    async fn grant(&mut self, name: &str, parent: &str) -> Result<(), CatalogError>;

    async fn revoke(&mut self, name: &str, parent: &str) -> Result<(), CatalogError>;

    async fn drop_role(&mut self, name: &str) -> Result<(), CatalogError>;
}

/// Roles observed at the start of a pass
///
/// System roles are kept apart: they are never mutation candidates but
/// still count as existing parents.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    managed_candidates: BTreeMap<String, ObservedRole>,
    system: BTreeSet<String>,
    reserved: BTreeSet<String>,
}

impl CatalogSnapshot {
    /// Split observed roles into candidates and system roles
    pub fn new<I, S>(roles: Vec<ObservedRole>, reserved_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reserved: BTreeSet<String> = reserved_names.into_iter().map(Into::into).collect();
        let mut snapshot = Self {
            reserved,
            ..Self::default()
        };
        for role in roles {
            if snapshot.is_system(&role.name) || role.oid == BOOTSTRAP_SUPERUSER_OID {
                snapshot.system.insert(role.name);
            } else {
                snapshot.managed_candidates.insert(role.name.clone(), role);
            }
        }
        snapshot
    }

    /// Whether the name belongs to a predefined or reserved role
    #[must_use]
    pub fn is_system(&self, name: &str) -> bool {
        name.starts_with(SYSTEM_ROLE_PREFIX)
            || self.reserved.contains(name)
            || self.system.contains(name)
    }

    /// A role that may be changed by the controller
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ObservedRole> {
        self.managed_candidates.get(name)
    }

    /// Whether any role (system roles included) has the name
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.managed_candidates.contains_key(name) || self.system.contains(name)
    }

    /// Non-system roles in name order
    pub fn candidates(&self) -> impl Iterator<Item = &ObservedRole> {
        self.managed_candidates.values()
    }
}
