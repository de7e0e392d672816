//! # Differ
//!
//! Pure computation of the plan that turns the observed catalogue into the
//! declared one.
//!
//! ## Ordering
//!
//! 1. `Create` for every missing role, by name, so parents created in the
//!    same pass exist before any grant.
//! 2. Per role, by name: `Revoke`, `Alter`, `UpdateComment`, `Grant`, or a
//!    single `Noop`.
//! 3. `Drop` for every role declared absent, by name.
//!
//! Roles that are not declared are never part of the plan.

use crate::crd::EnsureOption;
use crate::roles::catalog::CatalogSnapshot;
use crate::roles::secrets::SecretProblem;
use crate::roles::types::{
    Action, AttributeDelta, NoopReason, ObservedRole, PasswordAction, Plan, RoleSpec,
    SecretPassword,
};
use std::collections::{BTreeMap, BTreeSet};

/// Resolved password of each role that takes it from a secret
pub type ResolvedSecrets = BTreeMap<String, Result<SecretPassword, SecretProblem>>;

/// Everything the differ looks at
#[derive(Debug, Clone, Copy)]
pub struct DiffInput<'a> {
    /// Valid declarations
    pub desired: &'a [RoleSpec],
    pub observed: &'a CatalogSnapshot,
    /// Keyed by role name
    pub secrets: &'a ResolvedSecrets,
    /// Secret resource version last applied per role
    pub password_hints: &'a BTreeMap<String, String>,
}

/// What to do about a role's password
enum PasswordIntent {
    Keep,
    Set(SecretPassword),
    Disable,
}

/// Compute the plan for one pass
#[must_use]
pub fn diff(input: &DiffInput<'_>) -> Plan {
    let mut desired: Vec<&RoleSpec> = input.desired.iter().collect();
    desired.sort_by(|a, b| a.name.cmp(&b.name));

    let declared_present: BTreeSet<&str> = desired
        .iter()
        .filter(|spec| spec.ensure == EnsureOption::Present)
        .map(|spec| spec.name.as_str())
        .collect();
    let declared_absent: BTreeSet<&str> = desired
        .iter()
        .filter(|spec| spec.ensure == EnsureOption::Absent)
        .map(|spec| spec.name.as_str())
        .collect();
    let parent_available = |parent: &str| {
        declared_present.contains(parent)
            || (input.observed.exists(parent) && !declared_absent.contains(parent))
    };

    let mut creates = Vec::new();
    let mut per_role = Vec::new();
    let mut drops = Vec::new();

    for spec in desired {
        let name = spec.name.clone();
        if input.observed.is_system(&spec.name) {
            per_role.push(noop(name, NoopReason::Reserved));
            continue;
        }
        let observed = input.observed.get(&spec.name);

        match (spec.ensure, observed) {
            (EnsureOption::Absent, Some(_)) => drops.push(Action::Drop { name }),
            (EnsureOption::Absent, None) => per_role.push(noop(name, NoopReason::AlreadyAbsent)),
            (EnsureOption::Present, observed) => {
                let missing: Vec<&str> = spec
                    .in_roles
                    .iter()
                    .map(String::as_str)
                    .filter(|parent| !parent_available(*parent))
                    .collect();
                if !missing.is_empty() {
                    let reason = NoopReason::Invalid(format!(
                        "parent roles do not exist: {}",
                        missing.join(", ")
                    ));
                    per_role.push(noop(name, reason));
                    continue;
                }

                let intent = match password_intent(spec, observed, input) {
                    Ok(intent) => intent,
                    Err(reason) => {
                        per_role.push(noop(name, reason));
                        continue;
                    }
                };

                match observed {
                    None => plan_creation(spec, intent, &mut creates, &mut per_role),
                    Some(observed) => plan_update(spec, observed, intent, &mut per_role),
                }
            }
        }
    }

    let mut actions = creates;
    actions.append(&mut per_role);
    actions.append(&mut drops);
    Plan { actions }
}

fn noop(name: String, reason: NoopReason) -> Action {
    Action::Noop { name, reason }
}

fn password_intent(
    spec: &RoleSpec,
    observed: Option<&ObservedRole>,
    input: &DiffInput<'_>,
) -> Result<PasswordIntent, NoopReason> {
    let has_password = observed.is_some_and(|role| role.has_password);

    if spec.disable_password {
        return Ok(if has_password {
            PasswordIntent::Disable
        } else {
            PasswordIntent::Keep
        });
    }

    if let Some(secret_name) = &spec.password_secret {
        return match input.secrets.get(&spec.name) {
            Some(Ok(secret)) => {
                let applied =
                    input.password_hints.get(&spec.name) == Some(&secret.resource_version);
                if observed.is_none() || !has_password || !applied {
                    Ok(PasswordIntent::Set(secret.clone()))
                } else {
                    Ok(PasswordIntent::Keep)
                }
            }
            Some(Err(problem)) => Err(NoopReason::Deferred {
                message: problem.message.clone(),
                transient: problem.transient,
            }),
            None => Err(NoopReason::Deferred {
                message: format!("secret {secret_name} was not read in this pass"),
                transient: true,
            }),
        };
    }

    if spec.attributes.login && !has_password {
        return Err(NoopReason::Deferred {
            message: "login role has no password: set passwordSecret or disablePassword"
                .to_string(),
            transient: false,
        });
    }
    Ok(PasswordIntent::Keep)
}

fn plan_creation(
    spec: &RoleSpec,
    intent: PasswordIntent,
    creates: &mut Vec<Action>,
    per_role: &mut Vec<Action>,
) {
    let password = match intent {
        PasswordIntent::Set(secret) => Some(secret),
        PasswordIntent::Keep | PasswordIntent::Disable => None,
    };
    creates.push(Action::Create {
        spec: spec.clone(),
        password,
    });
    if !spec.comment.is_empty() {
        per_role.push(Action::UpdateComment {
            name: spec.name.clone(),
            text: spec.comment.clone(),
        });
    }
    for parent in &spec.in_roles {
        per_role.push(Action::Grant {
            name: spec.name.clone(),
            parent: parent.clone(),
        });
    }
}

fn plan_update(
    spec: &RoleSpec,
    observed: &ObservedRole,
    intent: PasswordIntent,
    per_role: &mut Vec<Action>,
) {
    let before = per_role.len();

    for parent in observed.in_roles.difference(&spec.in_roles) {
        per_role.push(Action::Revoke {
            name: spec.name.clone(),
            parent: parent.clone(),
        });
    }

    let delta = AttributeDelta::between(&observed.attributes, &spec.attributes);
    let password = match intent {
        PasswordIntent::Keep => None,
        PasswordIntent::Set(secret) => Some(PasswordAction::Set(secret)),
        PasswordIntent::Disable => Some(PasswordAction::Disable),
    };
    if !delta.is_empty() || password.is_some() {
        per_role.push(Action::Alter {
            name: spec.name.clone(),
            delta,
            password,
        });
    }

    if observed.comment != spec.comment {
        per_role.push(Action::UpdateComment {
            name: spec.name.clone(),
            text: spec.comment.clone(),
        });
    }

    for parent in spec.in_roles.difference(&observed.in_roles) {
        per_role.push(Action::Grant {
            name: spec.name.clone(),
            parent: parent.clone(),
        });
    }

    if per_role.len() == before {
        per_role.push(noop(spec.name.clone(), NoopReason::InSync));
    }
}
