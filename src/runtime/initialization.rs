//! # Initialization
//!
//! Controller startup: rustls setup, tracing, metrics, server startup,
//! Kubernetes client, reconciler context and the DependencyIndex rebuild.

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::api::Api;
use kube::Client;
use kube_runtime::reflector::{self, Store};
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{create_shared_config, ControllerConfig, SharedControllerConfig, SharedServerConfig};
use crate::controller::deployer::{ClusterConnector, HelmRunner, KubeApplier};
use crate::controller::fetcher::ReflectorEventReportFetcher;
use crate::controller::index::DependencyIndex;
use crate::controller::reconciler::{rebuild_index, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::KubeStore;
use crate::crd::EventReport;
use crate::observability;

/// Components shared by the watch loop and the background tasks
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
    /// Cancelled on shutdown; stops the collector and in-flight passes
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber, JSON or text depending on configuration.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("event_manager={}", config.log_level).into()
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json_logs() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Fails when the HTTP server cannot start, no Kubernetes client can be
/// built, or the existing add-ons cannot be listed for the index rebuild.
pub async fn initialize() -> Result<InitializationResult> {
    // must run before any TLS connection is opened
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    let (controller_config, server_config) = create_shared_config();
    let config = controller_config.read().await.clone();
    init_tracing(&config);

    info!("Starting event manager v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: timestamp={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_port = server_config.read().await.metrics_port;
    let server_handle = tokio::spawn({
        let state = Arc::clone(&server_state);
        async move {
            if let Err(e) = start_server(server_port, state).await {
                error!("HTTP server error: {}", e);
            }
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let shutdown = CancellationToken::new();

    let reports = spawn_event_report_reflector(client.clone(), shutdown.clone());
    let connector = ClusterConnector::new(client.clone());
    let applier = KubeApplier::new(connector, HelmRunner::new(&config.helm_binary));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(ReflectorEventReportFetcher::new(reports.clone())),
        Arc::new(applier),
        Arc::new(DependencyIndex::new()),
        config,
        shutdown.clone(),
    ));

    // the first passes must see a complete index, so wait for the report
    // cache and rebuild the index from persisted status before watching
    if reports.wait_until_ready().await.is_err() {
        warn!("EventReport cache closed before its initial sync");
    }
    let add_ons = rebuild_index(&reconciler)
        .await
        .context("Failed to rebuild the dependency index, is the EventBasedAddOn CRD installed?")?;
    info!(add_ons, "Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
        server_config,
        shutdown,
    })
}

/// Cache every EventReport of the management cluster, read by the fetcher
fn spawn_event_report_reflector(client: Client, shutdown: CancellationToken) -> Store<EventReport> {
    let (reader, writer) = reflector::store();
    let stream = reflector::reflector(
        writer,
        watcher(Api::<EventReport>::all(client), watcher::Config::default()),
    )
    .default_backoff()
    .applied_objects();
    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = stream.next() => match event {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(error = %e, "EventReport watch error"),
                    None => break,
                },
            }
        }
    });
    reader
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &SharedServerConfig,
) -> Result<()> {
    let (startup_timeout, poll_interval) = {
        let config = server_config.read().await;
        (config.startup_timeout(), config.poll_interval())
    };
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
