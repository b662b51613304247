//! # Watch Loop
//!
//! Runs the `EventBasedAddOn` controller. Besides the add-ons themselves the
//! controller watches every object an add-on depends on and maps changes to
//! the affected add-ons through the DependencyIndex.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::controller::collector::run_collector;
use crate::controller::deployer::ClusterConnector;
use crate::controller::reconciler::{
    reconcile, requeue_for_cluster, requeue_for_event_report, requeue_for_machine,
    requeue_for_reference, to_object_refs, Reconciler,
};
use crate::controller::server::ServerState;
use crate::controller::store::ManagedCluster;
use crate::crd::{
    CapiCluster, EventBasedAddOn, EventReport, EventSource, Machine, ReferencedKind,
    SveltosCluster,
};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::runtime::initialization::InitializationResult;

fn build_controller(client: &Client, reconciler: &Arc<Reconciler>) -> Controller<EventBasedAddOn> {
    let config = watcher::Config::default();
    let ctx = Arc::clone(reconciler);
    let on_capi = move |cluster: CapiCluster| {
        to_object_refs(requeue_for_cluster(&ctx, &ManagedCluster::from_capi(&cluster)))
    };
    let ctx = Arc::clone(reconciler);
    let on_sveltos = move |cluster: SveltosCluster| {
        to_object_refs(requeue_for_cluster(&ctx, &ManagedCluster::from_sveltos(&cluster)))
    };
    let ctx = Arc::clone(reconciler);
    let on_machine = move |machine: Machine| to_object_refs(requeue_for_machine(&ctx, &machine));
    let ctx = Arc::clone(reconciler);
    let on_report = move |report: EventReport| to_object_refs(requeue_for_event_report(&ctx, &report));
    let ctx = Arc::clone(reconciler);
    let on_event_source = move |es: EventSource| {
        to_object_refs(requeue_for_reference(&ctx, ReferencedKind::EventSource, "", &es.name_any()))
    };
    let ctx = Arc::clone(reconciler);
    let on_config_map = move |cm: ConfigMap| {
        let namespace = cm.namespace().unwrap_or_default();
        to_object_refs(requeue_for_reference(&ctx, ReferencedKind::ConfigMap, &namespace, &cm.name_any()))
    };
    let ctx = Arc::clone(reconciler);
    let on_secret = move |secret: Secret| {
        let namespace = secret.namespace().unwrap_or_default();
        to_object_refs(requeue_for_reference(&ctx, ReferencedKind::Secret, &namespace, &secret.name_any()))
    };

    let concurrency = u16::try_from(reconciler.config.max_concurrent_reconciliations).unwrap_or(u16::MAX);
    Controller::new(Api::<EventBasedAddOn>::all(client.clone()), config.clone().any_semantic())
        .watches(Api::<CapiCluster>::all(client.clone()), config.clone(), on_capi)
        .watches(Api::<SveltosCluster>::all(client.clone()), config.clone(), on_sveltos)
        .watches(Api::<Machine>::all(client.clone()), config.clone(), on_machine)
        .watches(Api::<EventReport>::all(client.clone()), config.clone(), on_report)
        .watches(Api::<EventSource>::all(client.clone()), config.clone(), on_event_source)
        .watches(Api::<ConfigMap>::all(client.clone()), config.clone(), on_config_map)
        .watches(Api::<Secret>::all(client.clone()), config, on_secret)
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
}

/// Run the controller until a shutdown signal is received
///
/// The watch is restarted when its stream ends or fails; the EventReport
/// collector runs alongside it.
///
/// # Errors
///
/// Currently never fails; the signature leaves room for fatal watch errors.
pub async fn run_watch_loop(init: InitializationResult) -> Result<(), anyhow::Error> {
    let InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
        shutdown,
        ..
    } = init;

    let collection_interval = controller_config.read().await.report_collection_interval();
    tokio::spawn(run_collector(
        client.clone(),
        ClusterConnector::new(client.clone()),
        Arc::clone(&reconciler.store),
        Arc::clone(&reconciler.index),
        collection_interval,
        shutdown.child_token(),
    ));

    spawn_signal_handler(Arc::clone(&server_state), shutdown.clone());

    let backoff_ms = Arc::new(AtomicU64::new(
        controller_config.read().await.backoff_start_secs.saturating_mul(1000),
    ));

    loop {
        if shutdown.is_cancelled() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        info!("Starting controller watch loop...");

        build_controller(&client, &reconciler)
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(|result| {
                let backoff_ms = Arc::clone(&backoff_ms);
                let controller_config = Arc::clone(&controller_config);
                async move {
                    let config = controller_config.read().await.clone();
                    match result {
                        Ok((object, _)) => {
                            debug!(addon = %object.name, "watch.event.reconciled");
                            backoff_ms.store(
                                config.backoff_start_secs.saturating_mul(1000),
                                Ordering::Relaxed,
                            );
                            Some(())
                        }
                        Err(e) => {
                            let keep = handle_watch_stream_error(
                                &format!("{e:?}"),
                                &backoff_ms,
                                config.backoff_max_secs.saturating_mul(1000),
                                config.watch_restart_delay_duration(),
                            )
                            .await;
                            keep.then_some(())
                        }
                    }
                }
            })
            .for_each(|()| futures::future::ready(()))
            .instrument(info_span!("controller.watch", operation = "watch_loop"))
            .await;

        // the stream also ends on a signal, give the handler the delay to observe it
        let delay = controller_config.read().await.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Shutdown requested, exiting watch loop");
                break;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Mark the server not ready and cancel in-flight work on SIGINT/SIGTERM
fn spawn_signal_handler(server_state: Arc<ServerState>, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        server_state.set_ready(false);
        shutdown.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
