//! # Reconcile Pass
//!
//! Runs one pass for one cluster: observe the catalogue, resolve secrets,
//! compute the plan and apply it action by action.
//!
//! The pass is not transactional. Each action is committed on its own, a
//! failed role does not stop the others, and once the deadline expires no
//! further action is started.

use crate::crd::RolePhase;
use crate::observability::metrics;
use crate::roles::catalog::{CatalogError, CatalogSnapshot, RoleCatalog};
use crate::roles::differ::{diff, DiffInput, ResolvedSecrets};
use crate::roles::retry::RetryPolicy;
use crate::roles::secrets::{resolve_password, SecretStore};
use crate::roles::types::{Action, NoopReason, ObservedRole, PasswordAction, RoleSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Knobs of a pass
#[derive(Debug, Clone)]
pub struct PassSettings {
    /// No action starts after this much time has passed
    pub deadline: Duration,
    pub retry: RetryPolicy,
    /// Names treated like system roles
    pub reserved_roles: Vec<String>,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(crate::constants::DEFAULT_PASS_DEADLINE_SECS),
            retry: RetryPolicy::default(),
            reserved_roles: crate::constants::DEFAULT_RESERVED_ROLES
                .iter()
                .map(|r| (*r).to_string())
                .collect(),
        }
    }
}

/// Declarations and state carried over from the previous pass
#[derive(Debug, Clone, Copy)]
pub struct PassInput<'a> {
    pub specs: &'a [RoleSpec],
    /// Declarations rejected by validation, name to reason
    pub invalid: &'a BTreeMap<String, String>,
    pub password_hints: &'a BTreeMap<String, String>,
}

/// Result for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleOutcome {
    pub phase: RolePhase,
    pub message: Option<String>,
}

impl RoleOutcome {
    fn reconciled() -> Self {
        Self {
            phase: RolePhase::Reconciled,
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: RolePhase::Failed,
            message: Some(message.into()),
        }
    }

    fn reserved(message: impl Into<String>) -> Self {
        Self {
            phase: RolePhase::Reserved,
            message: Some(message.into()),
        }
    }

    /// Whether the role is finished for this pass
    fn is_final(&self) -> bool {
        matches!(self.phase, RolePhase::Failed | RolePhase::Reserved)
    }
}

/// What a pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Roles handled in this pass; roles not reached are absent
    pub outcomes: BTreeMap<String, RoleOutcome>,
    /// Password hints to record (`Some`) or forget (`None`)
    pub password_versions: BTreeMap<String, Option<String>>,
    /// Live roles that are not declared
    pub unmanaged: BTreeSet<String>,
    /// A transient failure happened; the pass should be repeated soon
    pub transient: bool,
    /// Every role was handled before the deadline
    pub complete: bool,
    /// Statements executed successfully
    pub applied: usize,
}

impl PassReport {
    /// Roles that ended the pass failed
    pub fn failures(&self) -> impl Iterator<Item = (&String, &RoleOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.phase == RolePhase::Failed)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Pass-level failure; per-role failures are part of the report instead
#[derive(Debug, Error)]
pub enum PassError {
    #[error("failed to read the role catalogue: {0}")]
    Catalog(#[source] CatalogError),
    #[error("connection to the primary failed during the pass: {source}")]
    Fatal {
        #[source]
        source: CatalogError,
        /// What was applied before the connection broke, `None` when the
        /// catalogue was never read
        partial: Option<Box<PassReport>>,
    },
}

impl PassError {
    /// Report of the actions committed before the pass aborted
    #[must_use]
    pub fn partial_report(&self) -> Option<&PassReport> {
        match self {
            Self::Fatal { partial, .. } => partial.as_deref(),
            Self::Catalog(_) => None,
        }
    }
}

/// Run one reconcile pass
///
/// # Errors
/// `PassError` when the catalogue cannot be read or the connection becomes
/// unusable. Everything else is reported per role.
pub async fn run_pass<C, S>(
    catalog: &mut C,
    secrets: &S,
    input: PassInput<'_>,
    settings: &PassSettings,
) -> Result<PassReport, PassError>
where
    C: RoleCatalog + ?Sized,
    S: SecretStore + ?Sized,
{
    let deadline = Instant::now() + settings.deadline;
    let mut report = PassReport {
        complete: true,
        ..PassReport::default()
    };

    let observed = list_roles(catalog, &settings.retry).await?;
    let snapshot = CatalogSnapshot::new(observed, settings.reserved_roles.iter().cloned());

    for (name, reason) in input.invalid {
        report
            .outcomes
            .insert(name.clone(), RoleOutcome::failed(reason.clone()));
    }

    let declared: BTreeSet<&str> = input
        .specs
        .iter()
        .map(|spec| spec.name.as_str())
        .chain(input.invalid.keys().map(String::as_str))
        .collect();
    report.unmanaged = snapshot
        .candidates()
        .map(|role| role.name.as_str())
        .filter(|name| !declared.contains(name))
        .map(ToString::to_string)
        .collect();

    let mut resolved = ResolvedSecrets::new();
    for spec in input.specs.iter().filter(|spec| spec.uses_secret()) {
        if snapshot.is_system(&spec.name) {
            continue;
        }
        if Instant::now() >= deadline {
            warn!("Pass deadline reached while reading secrets");
            report.complete = false;
            report.transient = true;
            return Ok(report);
        }
        if let Some(secret_name) = &spec.password_secret {
            let password =
                resolve_password(secrets, secret_name, &spec.name, &settings.retry).await;
            resolved.insert(spec.name.clone(), password);
        }
    }

    let plan = diff(&DiffInput {
        desired: input.specs,
        observed: &snapshot,
        secrets: &resolved,
        password_hints: input.password_hints,
    });
    debug!(
        actions = plan.actions.len(),
        mutations = plan.mutations().count(),
        "Computed role plan"
    );

    for (index, action) in plan.actions.iter().enumerate() {
        let role = action.role();
        if report.outcomes.get(role).is_some_and(RoleOutcome::is_final) {
            debug!(role = role, action = action.kind(), "Skipping action of failed role");
            continue;
        }

        if let Action::Noop { reason, .. } = action {
            let outcome = noop_outcome(reason, &mut report);
            report.outcomes.insert(role.to_string(), outcome);
            continue;
        }

        if Instant::now() >= deadline {
            warn!(
                remaining = plan.actions.len() - index,
                "Pass deadline reached, leaving remaining actions for the next pass"
            );
            leave_pending(&plan.actions[index..], &mut report);
            report.complete = false;
            report.transient = true;
            break;
        }

        match apply_with_retry(catalog, action, &settings.retry).await {
            Ok(()) => {
                info!(role = role, action = action.kind(), "Applied role action");
                metrics::record_role_action(action.kind(), "ok");
                report.applied += 1;
                record_password_version(action, &mut report);
                report
                    .outcomes
                    .entry(role.to_string())
                    .or_insert_with(RoleOutcome::reconciled);
            }
            Err(CatalogError::DependencyExists(message)) if matches!(action, Action::Drop { .. }) => {
                warn!(role = role, error = %message, "Role cannot be dropped yet");
                metrics::record_role_action(action.kind(), "blocked");
                report.outcomes.insert(
                    role.to_string(),
                    RoleOutcome::reserved(format!("cannot drop role: {message}")),
                );
            }
            Err(error @ CatalogError::Fatal(_)) => {
                metrics::record_role_action(action.kind(), "failed");
                leave_pending(&plan.actions[index..], &mut report);
                report.complete = false;
                report.transient = true;
                return Err(PassError::Fatal {
                    source: error,
                    partial: Some(Box::new(report)),
                });
            }
            Err(error) => {
                warn!(role = role, action = action.kind(), error = %error, "Role action failed");
                metrics::record_role_action(action.kind(), "failed");
                report.transient |= error.is_transient();
                report.outcomes.insert(
                    role.to_string(),
                    RoleOutcome::failed(format!("{} failed: {error}", action.kind())),
                );
            }
        }
    }

    Ok(report)
}

async fn list_roles<C>(catalog: &mut C, retry: &RetryPolicy) -> Result<Vec<ObservedRole>, PassError>
where
    C: RoleCatalog + ?Sized,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match catalog.list().await {
            Ok(roles) => return Ok(roles),
            Err(error @ CatalogError::Fatal(_)) => {
                return Err(PassError::Fatal {
                    source: error,
                    partial: None,
                })
            }
            Err(error) if error.is_transient() && retry.allows_retry_after(attempt) => {
                debug!(attempt = attempt, error = %error, "Retrying role listing");
                retry.pause(attempt).await;
            }
            Err(error) => return Err(PassError::Catalog(error)),
        }
    }
}

async fn apply<C>(catalog: &mut C, action: &Action) -> Result<(), CatalogError>
where
    C: RoleCatalog + ?Sized,
{
    match action {
        Action::Create { spec, password } => {
            catalog
                .create(spec, password.as_ref().map(|secret| &secret.password))
                .await
        }
        Action::Alter {
            name,
            delta,
            password,
        } => catalog.alter(name, delta, password.as_ref()).await,
        Action::UpdateComment { name, text } => catalog.set_comment(name, text).await,
        Action::Grant { name, parent } => catalog.grant(name, parent).await,
        Action::Revoke { name, parent } => catalog.revoke(name, parent).await,
        Action::Drop { name } => catalog.drop_role(name).await,
        Action::Noop { .. } => Ok(()),
    }
}

async fn apply_with_retry<C>(
    catalog: &mut C,
    action: &Action,
    retry: &RetryPolicy,
) -> Result<(), CatalogError>
where
    C: RoleCatalog + ?Sized,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match apply(catalog, action).await {
            Err(error) if error.is_transient() && retry.allows_retry_after(attempt) => {
                debug!(
                    role = action.role(),
                    action = action.kind(),
                    attempt = attempt,
                    error = %error,
                    "Retrying role action"
                );
                retry.pause(attempt).await;
            }
            result => return result,
        }
    }
}

/// Roles with work left keep their previous status
fn leave_pending(pending: &[Action], report: &mut PassReport) {
    for action in pending {
        if report
            .outcomes
            .get(action.role())
            .is_some_and(|outcome| !outcome.is_final())
        {
            report.outcomes.remove(action.role());
        }
    }
}

fn noop_outcome(reason: &NoopReason, report: &mut PassReport) -> RoleOutcome {
    match reason {
        NoopReason::InSync | NoopReason::AlreadyAbsent => RoleOutcome::reconciled(),
        NoopReason::Reserved => RoleOutcome::reserved("system or reserved role cannot be managed"),
        NoopReason::Invalid(message) => RoleOutcome::failed(message.clone()),
        NoopReason::Deferred { message, transient } => {
            report.transient |= *transient;
            RoleOutcome::failed(message.clone())
        }
    }
}

fn record_password_version(action: &Action, report: &mut PassReport) {
    let version = match action {
        Action::Create { spec, password } => {
            (spec.name.as_str(), password.as_ref().map(|s| s.resource_version.clone()))
        }
        Action::Alter {
            name,
            password: Some(PasswordAction::Set(secret)),
            ..
        } => (name.as_str(), Some(secret.resource_version.clone())),
        Action::Alter {
            name,
            password: Some(PasswordAction::Disable),
            ..
        }
        | Action::Drop { name } => (name.as_str(), None),
        _ => return,
    };
    report
        .password_versions
        .insert(version.0.to_string(), version.1);
}
