//! # Reconciler
//!
//! Reconciliation of the managed roles declared on `Cluster` resources.
//!
//! The reconciler:
//! - Validates `spec.managed.roles`
//! - Connects to the primary through the `-rw` service
//! - Runs one pass over the role catalogue (see `crate::roles`)
//! - Publishes per-role outcomes to `status.managedRolesStatus`
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, errors and per-cluster backoff state
//! - `validation/` - Structural checks of declared roles
//! - `primary.rs` - Connection to the primary
//! - `reconcile.rs` - The reconcile function driven by the controller
//! - `status/` - Status merging and publishing

pub mod primary;
pub mod reconcile;
pub mod status;
pub mod types;
pub mod validation;

// Re-export public API
pub use reconcile::{reconcile, requeue_after};
pub use types::{pass_settings, BackoffState, Reconciler, ReconcilerError};
