//! # Role Validation
//!
//! Structural checks on a single managed role declaration.

use crate::constants::MAX_ROLE_NAME_BYTES;
use crate::controller::reconciler::validation::kubernetes::validate_kubernetes_name;
use crate::crd::RoleConfiguration;
use crate::roles::{RoleAttributes, RoleSpec};
use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};

/// Validate a role declaration and convert it into a `RoleSpec`
pub fn validate_role_configuration(role: &RoleConfiguration) -> Result<RoleSpec> {
    if role.name.is_empty() {
        return Err(anyhow::anyhow!("role name cannot be empty"));
    }
    if role.name.len() > MAX_ROLE_NAME_BYTES {
        return Err(anyhow::anyhow!(
            "role name exceeds maximum length of {MAX_ROLE_NAME_BYTES} bytes (got {})",
            role.name.len()
        ));
    }

    let connection_limit = i32::try_from(role.connection_limit)
        .ok()
        .filter(|limit| *limit >= -1)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "connectionLimit must be -1 (unlimited) or a non-negative 32-bit integer, got {}",
                role.connection_limit
            )
        })?;

    if role.in_roles.iter().any(|parent| parent == &role.name) {
        return Err(anyhow::anyhow!("role cannot be a member of itself"));
    }
    if let Some(parent) = role.in_roles.iter().find(|parent| parent.is_empty()) {
        return Err(anyhow::anyhow!("inRoles contains an empty name '{parent}'"));
    }

    if let Some(secret) = &role.password_secret {
        if role.disable_password {
            return Err(anyhow::anyhow!(
                "passwordSecret and disablePassword cannot be set together"
            ));
        }
        validate_kubernetes_name(&secret.name, "passwordSecret.name")?;
    }

    let valid_until = role
        .valid_until
        .as_deref()
        .map(parse_valid_until)
        .transpose()?;

    Ok(RoleSpec {
        name: role.name.clone(),
        ensure: role.ensure,
        comment: role.comment.clone().unwrap_or_default(),
        attributes: RoleAttributes {
            login: role.login,
            superuser: role.superuser,
            create_db: role.create_db,
            create_role: role.create_role,
            inherit: role.inherit,
            replication: role.replication,
            bypass_rls: role.bypass_rls,
            connection_limit,
            valid_until,
        },
        in_roles: role.in_roles.iter().cloned().collect(),
        password_secret: role.password_secret.as_ref().map(|s| s.name.clone()),
        disable_password: role.disable_password,
    })
}

/// Parse an RFC 3339 timestamp, rounded to the microsecond precision PostgreSQL stores
pub fn parse_valid_until(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc).trunc_subsecs(6))
        .map_err(|e| anyhow::anyhow!("validUntil '{value}' is not an RFC 3339 timestamp: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LocalObjectReference;
    use chrono::Timelike;

    #[test]
    fn test_defaults_convert_to_postgres_defaults() {
        let spec = validate_role_configuration(&RoleConfiguration::named("new_role")).unwrap();
        assert_eq!(spec.attributes, RoleAttributes::default());
        assert_eq!(spec.comment, "");
        assert!(spec.in_roles.is_empty());
    }

    #[test]
    fn test_connection_limit_below_minus_one_is_rejected() {
        let mut role = RoleConfiguration::named("dante");
        role.connection_limit = -2;
        assert!(validate_role_configuration(&role).is_err());
        role.connection_limit = i64::from(i32::MAX) + 1;
        assert!(validate_role_configuration(&role).is_err());
        role.connection_limit = 0;
        assert!(validate_role_configuration(&role).is_ok());
    }

    #[test]
    fn test_long_names_are_rejected() {
        let role = RoleConfiguration::named("x".repeat(64));
        assert!(validate_role_configuration(&role).is_err());
        let role = RoleConfiguration::named("x".repeat(63));
        assert!(validate_role_configuration(&role).is_ok());
    }

    #[test]
    fn test_self_membership_is_rejected() {
        let mut role = RoleConfiguration::named("dante");
        role.in_roles = vec!["dante".to_string()];
        assert!(validate_role_configuration(&role).is_err());
    }

    #[test]
    fn test_secret_and_disabled_password_conflict() {
        let mut role = RoleConfiguration::named("dante");
        role.password_secret = Some(LocalObjectReference {
            name: "cluster-example-dante".to_string(),
        });
        assert!(validate_role_configuration(&role).is_ok());
        role.disable_password = true;
        assert!(validate_role_configuration(&role).is_err());
    }

    #[test]
    fn test_invalid_secret_name_is_rejected() {
        let mut role = RoleConfiguration::named("dante");
        role.password_secret = Some(LocalObjectReference {
            name: "Not_A_Name".to_string(),
        });
        assert!(validate_role_configuration(&role).is_err());
    }

    #[test]
    fn test_valid_until_is_truncated_to_microseconds() {
        let at = parse_valid_until("2030-01-01T00:00:00.123456789+02:00").unwrap();
        assert_eq!(at.nanosecond(), 123_456_000);
        assert_eq!(at.hour(), 22);
        assert!(parse_valid_until("tomorrow").is_err());
    }
}
