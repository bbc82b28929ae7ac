//! Runtime configuration.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    ///
    /// Defaults to `info`.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,
    /// The port on which the xDS discovery server listens.
    #[serde(default = "Config::default_xds_port")]
    pub xds_port: u16,
    /// The address the Prometheus metrics endpoint binds to.
    #[serde(default = "Config::default_metrics_bind_address")]
    pub metrics_bind_address: SocketAddr,
    /// The address the health & readiness probe endpoints bind to.
    #[serde(default = "Config::default_health_probe_bind_address")]
    pub health_probe_bind_address: SocketAddr,
    /// Request leader election for this instance.
    ///
    /// Leader election is not supported; every instance serves its own snapshot cache.
    #[serde(default)]
    pub leader_elect: bool,

    /// The namespace to watch for config objects, all namespaces if not set.
    #[serde(default)]
    pub watch_namespace: Option<String>,
    /// The config object key holding the bootstrap document.
    #[serde(default = "Config::default_config_key")]
    pub config_key: String,
    /// The label marking config objects which hold a bootstrap document.
    #[serde(default = "Config::default_marker_label")]
    pub marker_label: String,

    /// The Kubernetes namespace of this instance, used for metrics labels.
    #[serde(default)]
    pub namespace: String,
    /// The name of the pod on which this instance is running, used for metrics labels.
    #[serde(default)]
    pub pod_name: String,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        if config.config_key.is_empty() {
            anyhow::bail!("CONFIG_KEY must not be empty");
        }
        if config.marker_label.is_empty() {
            anyhow::bail!("MARKER_LABEL must not be empty");
        }
        Ok(config)
    }

    /// Build the tracing filter from the configured logging directives.
    pub fn log_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.rust_log).with_context(|| format!("invalid RUST_LOG directives {:?}", self.rust_log))
    }

    /// The label selector used to filter watched config objects.
    ///
    /// Only the presence of the marker label is required.
    pub fn label_selector(&self) -> &str {
        &self.marker_label
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_xds_port() -> u16 {
        18000
    }

    fn default_metrics_bind_address() -> SocketAddr {
        ([0, 0, 0, 0], 8080).into()
    }

    fn default_health_probe_bind_address() -> SocketAddr {
        ([0, 0, 0, 0], 8081).into()
    }

    fn default_config_key() -> String {
        kube_xds_core::DEFAULT_CONFIG_KEY.into()
    }

    fn default_marker_label() -> String {
        kube_xds_core::LABEL_XDS_KIND.into()
    }
}

#[cfg(test)]
impl Config {
    /// Create a new config instance for testing, using all defaults.
    pub fn new_test() -> Result<Self> {
        envy::from_iter(Vec::<(String, String)>::new()).context("error building test config")
    }
}
