//! The kube-xds control plane.
//!
//! Watches labelled ConfigMaps holding Envoy bootstrap documents, publishes a consistent snapshot
//! of each document's resources per node, and serves those snapshots over REST-JSON xDS.

mod app;
mod config;
#[cfg(test)]
mod fixtures;
mod k8s;
mod reconciler;
mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Arc::new(Config::new()?);

    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var, defaulting to `info`.
        .with(cfg.log_filter()?)
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let metrics = PrometheusBuilder::new()
        .add_global_label("namespace", cfg.namespace.clone())
        .add_global_label("pod", cfg.pod_name.clone())
        .install_recorder()
        .context("error installing prometheus metrics recorder")?;

    tracing::info!(
        xds_port = %cfg.xds_port,
        metrics_bind_address = %cfg.metrics_bind_address,
        health_probe_bind_address = %cfg.health_probe_bind_address,
        watch_namespace = cfg.watch_namespace.as_deref().unwrap_or("*"),
        config_key = %cfg.config_key,
        "starting kube-xds",
    );
    if let Err(err) = App::new(cfg, metrics).await?.spawn().await.context("error joining app task").and_then(|res| res) {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
