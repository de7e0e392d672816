//! # Managed Roles
//!
//! Everything needed to drive the role catalogue of one PostgreSQL instance
//! toward the declared roles.
//!
//! ## Module Structure
//!
//! - `types.rs` - Role specs, observed roles, actions and plans
//! - `sql.rs` - Quoting and statement builders
//! - `catalog.rs` - `RoleCatalog` trait, error classification and snapshots
//! - `postgres.rs` - `RoleCatalog` over a `sqlx` connection
//! - `secrets.rs` - `SecretStore` trait and the Kubernetes implementation
//! - `differ.rs` - Pure plan computation
//! - `retry.rs` - In-pass linear retry
//! - `pass.rs` - Executes a plan and reports per-role outcomes

pub mod catalog;
pub mod differ;
pub mod pass;
pub mod postgres;
pub mod retry;
pub mod secrets;
pub mod sql;
pub mod types;

pub use catalog::{CatalogError, CatalogSnapshot, RoleCatalog};
pub use differ::{diff, DiffInput, ResolvedSecrets};
pub use pass::{run_pass, PassError, PassInput, PassReport, PassSettings, RoleOutcome};
pub use postgres::PostgresCatalog;
pub use retry::RetryPolicy;
pub use secrets::{
    resolve_password, KubeSecretStore, SecretEntry, SecretProblem, SecretStore, SecretStoreError,
};
pub use types::{
    Action, AttributeDelta, NoopReason, ObservedRole, Password, PasswordAction, Plan,
    RoleAttributes, RoleSpec, SecretPassword, ValidUntil,
};
