//! # Validation
//!
//! Validates the managed roles declared on a Cluster.
//!
//! Invalid entries do not stop the pass: they are reported as failed and
//! every other role is reconciled as usual.

mod kubernetes;
mod role;

pub use kubernetes::validate_kubernetes_name;
pub use role::{parse_valid_until, validate_role_configuration};

use crate::crd::RoleConfiguration;
use crate::roles::RoleSpec;
use std::collections::{BTreeMap, HashMap};

/// Declarations split into usable specs and rejected names
#[derive(Debug, Clone, Default)]
pub struct ValidatedRoles {
    /// Valid roles in declaration order
    pub specs: Vec<RoleSpec>,
    /// Rejected role name to reason
    pub invalid: BTreeMap<String, String>,
}

/// Validate every declared role
///
/// A name declared more than once is rejected as a whole, since no entry
/// can be preferred over the other.
#[must_use]
pub fn validate_managed_roles(roles: &[RoleConfiguration]) -> ValidatedRoles {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for role in roles {
        *occurrences.entry(role.name.as_str()).or_default() += 1;
    }

    let mut validated = ValidatedRoles::default();
    for role in roles {
        if occurrences.get(role.name.as_str()).copied().unwrap_or_default() > 1 {
            validated.invalid.insert(
                role.name.clone(),
                format!("role '{}' is declared more than once", role.name),
            );
            continue;
        }
        match validate_role_configuration(role) {
            Ok(spec) => validated.specs.push(spec),
            Err(e) => {
                validated.invalid.insert(role.name.clone(), e.to_string());
            }
        }
    }
    validated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_rejected_together() {
        let roles = vec![
            RoleConfiguration::named("dante"),
            RoleConfiguration::named("dante"),
            RoleConfiguration::named("new_role"),
        ];
        let validated = validate_managed_roles(&roles);
        assert_eq!(validated.specs.len(), 1);
        assert_eq!(validated.specs[0].name, "new_role");
        assert!(validated.invalid["dante"].contains("more than once"));
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let roles = vec![RoleConfiguration::named("Dante"), RoleConfiguration::named("dante")];
        let validated = validate_managed_roles(&roles);
        assert_eq!(validated.specs.len(), 2);
        assert!(validated.invalid.is_empty());
    }

    #[test]
    fn test_invalid_role_does_not_hide_valid_ones() {
        let mut broken = RoleConfiguration::named("broken");
        broken.connection_limit = -5;
        let validated = validate_managed_roles(&[broken, RoleConfiguration::named("ok")]);
        assert_eq!(validated.specs.len(), 1);
        assert!(validated.invalid.contains_key("broken"));
    }
}
