// src/server/mod.rs

//! Process wiring: constructs the RPC clients, the cluster store, the
//! controller, the drift reconciler, and the host-down coordinator from
//! configuration, registers the reconciler as a periodic task, and serves
//! the thin HTTP surface stub (spec §6) plus the Prometheus exporter.

mod http;
mod metrics_server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use crate::core::clients::inventory::NovaInventoryClient;
use crate::core::clients::role::HttpRoleClient;
use crate::core::clients::segment::HttpSegmentClient;
use crate::core::clients::token::KeystoneTokenProvider;
use crate::core::controller::Controller;
use crate::core::host_down::HostDownCoordinator;
use crate::core::reconciler::DriftReconciler;
use crate::core::scheduler::Scheduler;
use crate::core::store::InMemoryClusterStore;

/// The main server startup function, orchestrating all setup phases. Runs
/// until the process receives a shutdown signal (Ctrl-C).
pub async fn run(config: Config) -> Result<()> {
    let http_client = reqwest::Client::builder().build()?;

    let tokens = Arc::new(KeystoneTokenProvider::new(
        http_client.clone(),
        config.keystone.clone(),
    ));
    let inventory = Arc::new(NovaInventoryClient::new(
        http_client.clone(),
        config.resmgr.base_url.clone(),
        config.nova.region.clone(),
        tokens.clone(),
    ));
    let role = Arc::new(HttpRoleClient::new(
        http_client.clone(),
        config.resmgr.base_url.clone(),
        config.resmgr.role_name.clone(),
        tokens.clone(),
        config.hamgr.role_conflict_retry,
        config.hamgr.role_removal_poll,
    ));
    let segments = Arc::new(HttpSegmentClient::new(
        http_client.clone(),
        config.resmgr.base_url.clone(),
        tokens,
    ));
    let store = Arc::new(InMemoryClusterStore::new());

    let controller = Arc::new(Controller::with_min_host_count(
        store.clone(),
        inventory.clone(),
        role,
        segments.clone(),
        config.hamgr.min_host_count,
    ));

    let reconciler = Arc::new(DriftReconciler::new(
        store.clone(),
        inventory.clone(),
        segments.clone(),
        controller.clone(),
    ));

    let scheduler = Scheduler::new();
    let host_down = HostDownCoordinator::new(store, inventory, segments, controller.clone(), scheduler.clone());

    let reconcile_interval = config.hamgr.reconcile_interval;
    scheduler.add_periodic(
        move || {
            let reconciler = reconciler.clone();
            async move { reconciler.run_once().await }
        },
        reconcile_interval,
        true,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut metrics_handle = None;
    if config.metrics.enabled {
        let rx = shutdown_tx.subscribe();
        let port = config.metrics.port;
        metrics_handle = Some(tokio::spawn(async move {
            metrics_server::run_metrics_server(port, rx).await;
        }));
    }

    let http_state = http::HttpState { controller, host_down };
    let app = http::router(http_state);
    let addr = std::net::SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HAMgr HTTP surface listening on http://{addr}");

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                }
                _ = shutdown_rx.recv() => {}
            }
        })
        .await?;

    let _ = shutdown_tx.send(());
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    Ok(())
}
