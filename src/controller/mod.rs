//! # Controller
//!
//! Core controller modules of the event manager.
//!
//! - `selector`: cluster selector parsing and matching
//! - `keys`: identity keys of add-ons, clusters and references
//! - `index`: DependencyIndex (ReferenceMap and ClusterMap)
//! - `store`: object-store interface and its Kubernetes implementation
//! - `resolver`: resolution of policy, chart and event-source references
//! - `fetcher`: EventReport retrieval
//! - `hash`: change detection digest
//! - `template`: instantiation of policy content from event data
//! - `deployer`: deployment engine, appliers, helm, cluster connector
//! - `collector`: EventReport collection from managed clusters
//! - `reconciler`: reconciliation of EventBasedAddOn resources
//! - `backoff`: bounded exponential backoff for retries
//! - `error`: error taxonomy
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod collector;
pub mod deployer;
pub mod error;
pub mod fetcher;
pub mod hash;
pub mod index;
pub mod keys;
pub mod reconciler;
pub mod resolver;
pub mod selector;
pub mod server;
pub mod store;
pub mod template;
