//! # Role Types
//!
//! Domain types shared by the catalog, the differ and the pass runner.

use crate::crd::EnsureOption;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use zeroize::Zeroizing;

/// Password material read from a secret
///
/// The buffer is zeroed on drop and never printed.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Plain text, only for building statements and secret payloads
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl Eq for Password {}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Password of a role together with the version of the secret it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPassword {
    pub password: Password,
    pub resource_version: String,
}

/// Expiry of a role's password
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidUntil {
    At(DateTime<Utc>),
    Infinity,
}

/// Role attributes compared between declaration and database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAttributes {
    pub login: bool,
    pub superuser: bool,
    pub create_db: bool,
    pub create_role: bool,
    pub inherit: bool,
    pub replication: bool,
    pub bypass_rls: bool,
    pub connection_limit: i32,
    /// `None` means the password never expires
    pub valid_until: Option<DateTime<Utc>>,
}

impl Default for RoleAttributes {
    /// PostgreSQL's defaults for `CREATE ROLE`
    fn default() -> Self {
        Self {
            login: false,
            superuser: false,
            create_db: false,
            create_role: false,
            inherit: true,
            replication: false,
            bypass_rls: false,
            connection_limit: -1,
            valid_until: None,
        }
    }
}

/// Changed attributes of an existing role, `None` when unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDelta {
    pub login: Option<bool>,
    pub superuser: Option<bool>,
    pub create_db: Option<bool>,
    pub create_role: Option<bool>,
    pub inherit: Option<bool>,
    pub replication: Option<bool>,
    pub bypass_rls: Option<bool>,
    pub connection_limit: Option<i32>,
    pub valid_until: Option<ValidUntil>,
}

impl AttributeDelta {
    /// Attributes to change to turn `observed` into `desired`
    #[must_use]
    pub fn between(observed: &RoleAttributes, desired: &RoleAttributes) -> Self {
        fn changed<T: PartialEq + Copy>(observed: T, desired: T) -> Option<T> {
            (observed != desired).then_some(desired)
        }
        Self {
            login: changed(observed.login, desired.login),
            superuser: changed(observed.superuser, desired.superuser),
            create_db: changed(observed.create_db, desired.create_db),
            create_role: changed(observed.create_role, desired.create_role),
            inherit: changed(observed.inherit, desired.inherit),
            replication: changed(observed.replication, desired.replication),
            bypass_rls: changed(observed.bypass_rls, desired.bypass_rls),
            connection_limit: changed(observed.connection_limit, desired.connection_limit),
            valid_until: changed(observed.valid_until, desired.valid_until)
                .map(|until| until.map_or(ValidUntil::Infinity, ValidUntil::At)),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the delta to a set of attributes
    pub fn apply_to(&self, attributes: &mut RoleAttributes) {
        fn set<T: Copy>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        set(&mut attributes.login, self.login);
        set(&mut attributes.superuser, self.superuser);
        set(&mut attributes.create_db, self.create_db);
        set(&mut attributes.create_role, self.create_role);
        set(&mut attributes.inherit, self.inherit);
        set(&mut attributes.replication, self.replication);
        set(&mut attributes.bypass_rls, self.bypass_rls);
        set(&mut attributes.connection_limit, self.connection_limit);
        if let Some(until) = self.valid_until {
            attributes.valid_until = match until {
                ValidUntil::At(at) => Some(at),
                ValidUntil::Infinity => None,
            };
        }
    }
}

/// A validated managed role declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub ensure: EnsureOption,
    /// Empty means no comment
    pub comment: String,
    pub attributes: RoleAttributes,
    pub in_roles: BTreeSet<String>,
    /// Name of the secret supplying the password
    pub password_secret: Option<String>,
    pub disable_password: bool,
}

impl RoleSpec {
    /// Whether the role takes its password from a secret in this pass
    #[must_use]
    pub fn uses_secret(&self) -> bool {
        self.ensure == EnsureOption::Present
            && !self.disable_password
            && self.password_secret.is_some()
    }
}

/// A role as read from the database catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRole {
    pub oid: i64,
    pub name: String,
    /// Empty when the role has no comment
    pub comment: String,
    pub attributes: RoleAttributes,
    pub in_roles: BTreeSet<String>,
    pub has_password: bool,
}

/// Password change carried by an `Alter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordAction {
    /// Set the password to the secret material
    Set(SecretPassword),
    /// Set the password to NULL
    Disable,
}

/// Why a role needs no statement in this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoopReason {
    /// Database already matches the declaration
    InSync,
    /// Role declared absent and does not exist
    AlreadyAbsent,
    /// Role is a system or reserved role
    Reserved,
    /// Declaration cannot be applied until it changes
    Invalid(String),
    /// A prerequisite is missing; retried on a later pass
    Deferred { message: String, transient: bool },
}

/// One step of a reconcile plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create {
        spec: RoleSpec,
        password: Option<SecretPassword>,
    },
    Alter {
        name: String,
        delta: AttributeDelta,
        password: Option<PasswordAction>,
    },
    UpdateComment {
        name: String,
        text: String,
    },
    Grant {
        name: String,
        parent: String,
    },
    Revoke {
        name: String,
        parent: String,
    },
    Drop {
        name: String,
    },
    Noop {
        name: String,
        reason: NoopReason,
    },
}

impl Action {
    /// Role the action applies to
    #[must_use]
    pub fn role(&self) -> &str {
        match self {
            Action::Create { spec, .. } => &spec.name,
            Action::Alter { name, .. }
            | Action::UpdateComment { name, .. }
            | Action::Grant { name, .. }
            | Action::Revoke { name, .. }
            | Action::Drop { name }
            | Action::Noop { name, .. } => name,
        }
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Alter { .. } => "alter",
            Action::UpdateComment { .. } => "comment",
            Action::Grant { .. } => "grant",
            Action::Revoke { .. } => "revoke",
            Action::Drop { .. } => "drop",
            Action::Noop { .. } => "noop",
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Action::Noop { .. })
    }
}

/// Ordered list of actions computed for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    /// True when nothing needs to be executed
    #[must_use]
    pub fn is_noop_only(&self) -> bool {
        self.actions.iter().all(Action::is_noop)
    }

    /// Actions that change the database
    pub fn mutations(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|action| !action.is_noop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("s3cr3t");
        assert_eq!(format!("{password:?}"), "Password(<redacted>)");
        assert_eq!(password, Password::new("s3cr3t"));
        assert_ne!(password, Password::new("s3cr3t "));
    }

    #[test]
    fn test_delta_between_defaults_is_empty() {
        let delta = AttributeDelta::between(&RoleAttributes::default(), &RoleAttributes::default());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_lists_only_changed_attributes() {
        let observed = RoleAttributes {
            login: true,
            create_db: true,
            connection_limit: 4,
            ..RoleAttributes::default()
        };
        let desired = RoleAttributes {
            login: false,
            create_db: false,
            create_role: true,
            connection_limit: 10,
            ..RoleAttributes::default()
        };
        let delta = AttributeDelta::between(&observed, &desired);
        assert_eq!(delta.login, Some(false));
        assert_eq!(delta.create_db, Some(false));
        assert_eq!(delta.create_role, Some(true));
        assert_eq!(delta.connection_limit, Some(10));
        assert_eq!(delta.superuser, None);
        assert_eq!(delta.inherit, None);

        let mut applied = observed.clone();
        delta.apply_to(&mut applied);
        assert_eq!(applied, desired);
    }

    #[test]
    fn test_removed_expiry_becomes_infinity() {
        let observed = RoleAttributes {
            valid_until: Some(Utc::now()),
            ..RoleAttributes::default()
        };
        let delta = AttributeDelta::between(&observed, &RoleAttributes::default());
        assert_eq!(delta.valid_until, Some(ValidUntil::Infinity));
    }
}
