//! # Status Management
//!
//! Merges pass reports into `status.managedRolesStatus` and writes it back.

mod aggregate;
mod publish;

pub use aggregate::merge_status;
pub use publish::{publish_status, status_patch};
