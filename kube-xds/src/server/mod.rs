mod discovery;
mod prom;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;
use futures::prelude::*;
use futures::stream::FuturesUnordered;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use kube_xds_core::SnapshotCache;

/// Application server.
///
/// Hosts the discovery server, the Prometheus scrape endpoint and the health probes, each on its
/// own listener.
pub struct AppServer {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The snapshot cache served to data-plane processes.
    cache: Arc<dyn SnapshotCache>,
    /// Set once the controller has completed its initial sync.
    ready: Arc<AtomicBool>,
    /// A handle to the installed metrics recorder.
    metrics: PrometheusHandle,

    /// A channel used for triggering graceful shutdown.
    shutdown: broadcast::Sender<()>,
}

impl AppServer {
    /// Create a new instance.
    pub fn new(
        config: Arc<Config>, cache: Arc<dyn SnapshotCache>, ready: Arc<AtomicBool>, metrics: PrometheusHandle, shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            config,
            cache,
            ready,
            metrics,
            shutdown,
        }
    }

    /// Spawn all network servers.
    ///
    /// All listeners are bound before this call returns, so bind errors surface here. The returned
    /// handle resolves once every server has shut down.
    pub async fn spawn(self) -> Result<JoinHandle<()>> {
        let xds_addr = SocketAddr::from(([0, 0, 0, 0], self.config.xds_port));
        let xds_listener = bind(xds_addr, "discovery").await?;
        let metrics_listener = bind(self.config.metrics_bind_address, "metrics").await?;
        let probes_listener = bind(self.config.health_probe_bind_address, "health probe").await?;

        let mut servers: FuturesUnordered<_> = vec![
            serve("discovery", xds_listener, discovery::router(self.cache.clone()), &self.shutdown),
            serve("metrics", metrics_listener, prom::router(self.metrics.clone()), &self.shutdown),
            serve("health probe", probes_listener, probes_router(self.ready.clone()), &self.shutdown),
        ]
        .into_iter()
        .collect();

        // Spawn a task which awaits the shutdown of all spawned servers.
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            while let Some((name, res)) = servers.next().await {
                if let Err(err) = res {
                    tracing::error!(error = ?err, server = name, "error from server, shutting down");
                    let _res = shutdown.send(());
                }
            }
        }))
    }
}

async fn bind(addr: SocketAddr, name: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("error binding socket address {} for {} server", addr, name))?;
    tracing::info!("{} server is listening at {}", name, addr);
    Ok(listener)
}

/// Serve the given router until shutdown is signalled.
fn serve(
    name: &'static str, listener: TcpListener, router: Router, shutdown: &broadcast::Sender<()>,
) -> BoxFuture<'static, (&'static str, std::io::Result<()>)> {
    let mut shutdown_rx = shutdown.subscribe();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _res = shutdown_rx.recv().await;
        })
        .into_future()
        .map(move |res| (name, res))
        .boxed()
}

/// Build the router of the liveness & readiness probes.
fn probes_router(ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(readyz))
        .with_state(ready)
}

/// Ready once the controller has completed its initial sync of config objects.
async fn readyz(State(ready): State<Arc<AtomicBool>>) -> StatusCode {
    if ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
