//! # Runtime
//!
//! Process-level wiring of the controller.
//!
//! - `initialization.rs` - rustls, tracing, metrics, probe server and client setup
//! - `watch_loop.rs` - `Controller` over `Cluster` objects, restarted when the stream ends
//! - `error_policy.rs` - Requeue delays for failed passes and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
