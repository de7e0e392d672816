//! Common test utilities
//!
//! In-memory `RoleCatalog` and `SecretStore` implementations plus a harness
//! that runs passes the way the reconciler does, carrying the status (and
//! with it the password hints) from one pass to the next.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use managed_roles_controller::controller::reconciler::status::merge_status;
use managed_roles_controller::controller::reconciler::validation::validate_managed_roles;
use managed_roles_controller::crd::{
    LocalObjectReference, ManagedRolesStatus, RoleConfiguration,
};
use managed_roles_controller::roles::sql;
use managed_roles_controller::roles::{
    run_pass, AttributeDelta, CatalogError, ObservedRole, PassError, PassInput, PassReport,
    PassSettings,
    Password, PasswordAction, RetryPolicy, RoleAttributes, RoleCatalog, RoleSpec, SecretEntry,
    SecretStore, SecretStoreError,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A role as stored by the fake catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRole {
    pub oid: i64,
    pub attributes: RoleAttributes,
    pub comment: String,
    pub in_roles: BTreeSet<String>,
    pub password: Option<String>,
    /// Owns database objects, so `DROP ROLE` fails
    pub owns_objects: bool,
}

/// In-memory role catalogue behaving like a fresh PostgreSQL instance
#[derive(Debug)]
pub struct FakeCatalog {
    pub roles: BTreeMap<String, FakeRole>,
    next_oid: i64,
    /// Statements as they would be logged (passwords redacted)
    pub statements: Vec<String>,
    /// Errors returned by the next calls of an operation, keyed by (operation, role)
    failures: HashMap<(String, String), VecDeque<CatalogError>>,
    list_failures: VecDeque<CatalogError>,
    /// Time every statement takes; requires a paused tokio clock
    pub latency: Option<Duration>,
}

impl Default for FakeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCatalog {
    /// Catalogue with the bootstrap superuser and a few predefined roles
    pub fn new() -> Self {
        let mut catalog = Self {
            roles: BTreeMap::new(),
            next_oid: 16384,
            statements: Vec::new(),
            failures: HashMap::new(),
            list_failures: VecDeque::new(),
            latency: None,
        };
        let superuser = RoleAttributes {
            login: true,
            superuser: true,
            create_db: true,
            create_role: true,
            replication: true,
            bypass_rls: true,
            ..RoleAttributes::default()
        };
        catalog.insert_with_oid(10, "postgres", superuser);
        catalog.insert_with_oid(3373, "pg_monitor", RoleAttributes::default());
        catalog.insert_with_oid(4200, "pg_read_all_data", RoleAttributes::default());
        catalog.insert(
            "streaming_replica",
            RoleAttributes {
                login: true,
                replication: true,
                ..RoleAttributes::default()
            },
        );
        catalog
    }

    fn insert_with_oid(&mut self, oid: i64, name: &str, attributes: RoleAttributes) {
        self.roles.insert(
            name.to_string(),
            FakeRole {
                oid,
                attributes,
                comment: String::new(),
                in_roles: BTreeSet::new(),
                password: None,
                owns_objects: false,
            },
        );
    }

    /// Add a role behind the controller's back
    pub fn insert(&mut self, name: &str, attributes: RoleAttributes) {
        let oid = self.next_oid;
        self.next_oid += 1;
        self.insert_with_oid(oid, name, attributes);
    }

    /// Make the next `count` calls of `operation` on `role` fail
    pub fn fail_next(&mut self, operation: &str, role: &str, error: CatalogError, count: usize) {
        let queue = self
            .failures
            .entry((operation.to_string(), role.to_string()))
            .or_default();
        for _ in 0..count {
            queue.push_back(error.clone());
        }
    }

    pub fn fail_next_list(&mut self, error: CatalogError) {
        self.list_failures.push_back(error);
    }

    async fn injected(&mut self, operation: &str, role: &str) -> Result<(), CatalogError> {
        if let Some(latency) = self.latency {
            tokio::time::advance(latency).await;
        }
        match self
            .failures
            .get_mut(&(operation.to_string(), role.to_string()))
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn role_mut(&mut self, name: &str) -> Result<&mut FakeRole, CatalogError> {
        self.roles
            .get_mut(name)
            .ok_or_else(|| CatalogError::Syntax(format!("role \"{name}\" does not exist")))
    }

    /// Whether `name` could open a session with `password`
    pub fn can_authenticate(&self, name: &str, password: &str) -> bool {
        self.roles.get(name).is_some_and(|role| {
            role.attributes.login && role.password.as_deref() == Some(password)
        })
    }

    /// Change a password directly in the database
    pub fn set_password_in_database(&mut self, name: &str, password: &str) {
        if let Some(role) = self.roles.get_mut(name) {
            role.password = Some(password.to_string());
        }
    }

    pub fn role(&self, name: &str) -> &FakeRole {
        &self.roles[name]
    }

    pub fn role_names(&self) -> BTreeSet<String> {
        self.roles.keys().cloned().collect()
    }
}

#[async_trait]
impl RoleCatalog for FakeCatalog {
    async fn list(&mut self) -> Result<Vec<ObservedRole>, CatalogError> {
        if let Some(error) = self.list_failures.pop_front() {
            return Err(error);
        }
        Ok(self
            .roles
            .iter()
            .map(|(name, role)| ObservedRole {
                oid: role.oid,
                name: name.clone(),
                comment: role.comment.clone(),
                attributes: role.attributes.clone(),
                in_roles: role.in_roles.clone(),
                has_password: role.password.is_some(),
            })
            .collect())
    }

    async fn create(
        &mut self,
        spec: &RoleSpec,
        password: Option<&Password>,
    ) -> Result<(), CatalogError> {
        self.injected("create", &spec.name).await?;
        if self.roles.contains_key(&spec.name) {
            return Err(CatalogError::Syntax(format!(
                "role \"{}\" already exists",
                spec.name
            )));
        }
        self.statements
            .push(sql::create_role(spec, password).to_string());
        let oid = self.next_oid;
        self.next_oid += 1;
        self.roles.insert(
            spec.name.clone(),
            FakeRole {
                oid,
                attributes: spec.attributes.clone(),
                comment: String::new(),
                in_roles: BTreeSet::new(),
                password: password
                    .filter(|_| !spec.disable_password)
                    .map(|p| p.expose().to_string()),
                owns_objects: false,
            },
        );
        Ok(())
    }

    async fn alter(
        &mut self,
        name: &str,
        delta: &AttributeDelta,
        password: Option<&PasswordAction>,
    ) -> Result<(), CatalogError> {
        self.injected("alter", name).await?;
        if let Some(statement) = sql::alter_role(name, delta, password) {
            self.statements.push(statement.to_string());
        }
        let role = self.role_mut(name)?;
        delta.apply_to(&mut role.attributes);
        match password {
            Some(PasswordAction::Set(secret)) => {
                role.password = Some(secret.password.expose().to_string());
            }
            Some(PasswordAction::Disable) => role.password = None,
            None => {}
        }
        Ok(())
    }

    async fn set_comment(&mut self, name: &str, text: &str) -> Result<(), CatalogError> {
        self.injected("comment", name).await?;
        self.statements
            .push(sql::comment_on_role(name, text).to_string());
        self.role_mut(name)?.comment = text.to_string();
        Ok(())
    }

    async fn grant(&mut self, name: &str, parent: &str) -> Result<(), CatalogError> {
        self.injected("grant", name).await?;
        if !self.roles.contains_key(parent) {
            return Err(CatalogError::Syntax(format!(
                "role \"{parent}\" does not exist"
            )));
        }
        self.statements.push(sql::grant_role(name, parent).to_string());
        self.role_mut(name)?.in_roles.insert(parent.to_string());
        Ok(())
    }

    async fn revoke(&mut self, name: &str, parent: &str) -> Result<(), CatalogError> {
        self.injected("revoke", name).await?;
        self.statements
            .push(sql::revoke_role(name, parent).to_string());
        self.role_mut(name)?.in_roles.remove(parent);
        Ok(())
    }

    async fn drop_role(&mut self, name: &str) -> Result<(), CatalogError> {
        self.injected("drop", name).await?;
        if self.role_mut(name)?.owns_objects {
            return Err(CatalogError::DependencyExists(format!(
                "role \"{name}\" cannot be dropped because some objects depend on it"
            )));
        }
        self.statements.push(sql::drop_role(name).to_string());
        self.roles.remove(name);
        for role in self.roles.values_mut() {
            role.in_roles.remove(name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeSecret {
    username: Option<String>,
    password: String,
    version: u64,
}

/// In-memory secret store with resource versions
#[derive(Debug, Default)]
pub struct FakeSecretStore {
    secrets: Mutex<BTreeMap<String, FakeSecret>>,
    next_version: Mutex<u64>,
    /// Remaining reads of a secret that fail transiently
    transient_reads: Mutex<HashMap<String, u32>>,
    /// Remaining writes of a secret rejected as conflicting
    conflicting_writes: Mutex<HashMap<String, u32>>,
    pub reads: Mutex<u32>,
}

impl FakeSecretStore {
    fn bump_version(&self) -> u64 {
        let mut next = self.next_version.lock().unwrap();
        *next += 1;
        *next
    }

    /// Create or replace a secret, bumping its resource version
    pub fn put(&self, name: &str, username: Option<&str>, password: &str) -> String {
        let version = self.bump_version();
        self.secrets.lock().unwrap().insert(
            name.to_string(),
            FakeSecret {
                username: username.map(ToString::to_string),
                password: password.to_string(),
                version,
            },
        );
        version.to_string()
    }

    pub fn remove(&self, name: &str) {
        self.secrets.lock().unwrap().remove(name);
    }

    pub fn username(&self, name: &str) -> Option<String> {
        self.secrets
            .lock()
            .unwrap()
            .get(name)
            .and_then(|secret| secret.username.clone())
    }

    pub fn version(&self, name: &str) -> Option<String> {
        self.secrets
            .lock()
            .unwrap()
            .get(name)
            .map(|secret| secret.version.to_string())
    }

    pub fn fail_reads(&self, name: &str, count: u32) {
        self.transient_reads
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    pub fn conflict_writes(&self, name: &str, count: u32) {
        self.conflicting_writes
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    fn take(counter: &Mutex<HashMap<String, u32>>, name: &str) -> bool {
        let mut counters = counter.lock().unwrap();
        match counters.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn read(&self, name: &str) -> Result<SecretEntry, SecretStoreError> {
        *self.reads.lock().unwrap() += 1;
        if Self::take(&self.transient_reads, name) {
            return Err(SecretStoreError::Transient {
                name: name.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        let secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get(name)
            .ok_or_else(|| SecretStoreError::NotFound(name.to_string()))?;
        Ok(SecretEntry {
            username: secret.username.clone(),
            password: Password::new(secret.password.clone()),
            resource_version: secret.version.to_string(),
        })
    }

    async fn write(
        &self,
        name: &str,
        username: &str,
        password: &Password,
        expected_version: &str,
    ) -> Result<String, SecretStoreError> {
        if Self::take(&self.conflicting_writes, name) {
            // Somebody else touched the secret in between
            let version = self.bump_version();
            if let Some(secret) = self.secrets.lock().unwrap().get_mut(name) {
                secret.version = version;
            }
            return Err(SecretStoreError::Conflict(name.to_string()));
        }
        let version = self.bump_version();
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get_mut(name)
            .ok_or_else(|| SecretStoreError::NotFound(name.to_string()))?;
        if secret.version.to_string() != expected_version {
            return Err(SecretStoreError::Conflict(name.to_string()));
        }
        secret.username = Some(username.to_string());
        secret.password = password.expose().to_string();
        secret.version = version;
        Ok(version.to_string())
    }
}

/// Settings with a generous deadline and millisecond retry steps
pub fn test_settings() -> PassSettings {
    PassSettings {
        deadline: Duration::from_secs(30),
        retry: RetryPolicy::new(3, Duration::from_millis(1)),
        reserved_roles: vec!["postgres".to_string(), "streaming_replica".to_string()],
    }
}

/// A role entry with a password secret named after the cluster and role
pub fn login_role(name: &str) -> RoleConfiguration {
    let mut role = RoleConfiguration::named(name);
    role.login = true;
    role.password_secret = Some(LocalObjectReference {
        name: secret_name(name),
    });
    role
}

pub fn secret_name(role: &str) -> String {
    format!("cluster-example-{role}")
}

/// Runs passes against the fakes and keeps the merged status between them
#[derive(Debug)]
pub struct Harness {
    pub catalog: FakeCatalog,
    pub secrets: FakeSecretStore,
    pub settings: PassSettings,
    pub status: Option<ManagedRolesStatus>,
    minute: u32,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            catalog: FakeCatalog::new(),
            secrets: FakeSecretStore::default(),
            settings: test_settings(),
            status: None,
            minute: 0,
        }
    }

    fn password_hints(&self) -> BTreeMap<String, String> {
        self.status
            .as_ref()
            .map(|status| {
                status
                    .password_status
                    .iter()
                    .map(|(role, state)| (role.clone(), state.resource_version.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One pass over `roles`, followed by the status merge
    pub async fn reconcile(&mut self, roles: &[RoleConfiguration]) -> PassReport {
        self.try_reconcile(roles)
            .await
            .expect("pass should not abort")
    }

    /// Like `reconcile`, but an aborted pass is returned as its error after
    /// its partial report was merged into the status
    pub async fn try_reconcile(
        &mut self,
        roles: &[RoleConfiguration],
    ) -> Result<PassReport, PassError> {
        let validated = validate_managed_roles(roles);
        let hints = self.password_hints();
        let result = run_pass(
            &mut self.catalog,
            &self.secrets,
            PassInput {
                specs: &validated.specs,
                invalid: &validated.invalid,
                password_hints: &hints,
            },
            &self.settings,
        )
        .await;

        let report = match &result {
            Ok(report) => Some(report),
            Err(error) => error.partial_report(),
        };
        if let Some(report) = report {
            let declared: BTreeSet<String> = roles.iter().map(|role| role.name.clone()).collect();
            self.minute += 1;
            let now = Utc
                .with_ymd_and_hms(2026, 1, 1, 12, self.minute % 60, 0)
                .unwrap();
            self.status = Some(merge_status(
                self.status.as_ref(),
                report,
                &declared,
                now,
                chrono::Duration::minutes(5),
            ));
        }
        result
    }

    pub fn status(&self) -> &ManagedRolesStatus {
        self.status.as_ref().expect("no pass has run yet")
    }
}
