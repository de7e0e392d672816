//! # Custom Resource Definitions
//!
//! CRD types for the managed roles controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `Cluster` resource and default values
//! - `role.rs` - Managed role declarations
//! - `status.rs` - Status types for tracking reconciliation state

mod role;
mod spec;
mod status;

// Re-export all public types
pub use role::{EnsureOption, LocalObjectReference, RoleConfiguration};
pub use spec::{
    default_connection_limit, default_true, Cluster, ClusterSpec, ManagedConfiguration,
};
pub use status::{ClusterStatus, ManagedRolesStatus, PasswordState, RolePhase, RoleStatus};
