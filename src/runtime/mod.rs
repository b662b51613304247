//! # Runtime
//!
//! Startup and the controller watch loop.
//!
//! - `initialization.rs` - tracing, metrics server, clients, index rebuild
//! - `watch_loop.rs` - controller, secondary watches, restart loop
//! - `error_policy.rs` - reconciliation backoff and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
