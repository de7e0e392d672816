//! # Controller
//!
//! Core controller modules for the Managed Roles Controller.
//!
//! - `backoff`: Fibonacci backoff for failed passes
//! - `reconciler`: Reconciliation of managed roles per cluster
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
