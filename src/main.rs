//! # Event Manager
//!
//! Kubernetes controller that deploys `EventBasedAddOn` resources to the
//! managed clusters they select.

use anyhow::Result;
use event_manager::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init).await
}
