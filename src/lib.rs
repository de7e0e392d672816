//! Managed Roles Controller Library
//!
//! Core functionality of the managed roles controller, exposed as a library
//! so the pass can be driven against in-memory catalogs and secret stores.
//!
//! - `crd` - `Cluster` resource with managed roles and their status
//! - `roles` - Catalog, secret store, differ and the reconcile pass
//! - `controller` - Reconciler, validation, status publishing, probe server
//! - `runtime` - Initialization, watch loop and error policy
//! - `config` / `constants` - Controller settings and defaults
//! - `observability` - Prometheus metrics

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod roles;
pub mod runtime;
