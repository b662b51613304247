//! Event Manager Library
//!
//! Deploys add-ons to every managed cluster matching an `EventBasedAddOn`,
//! customized with the events each cluster reports.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use event_manager::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
