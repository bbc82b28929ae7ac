//! Kubernetes controller.
//!
//! This controller watches config objects carrying the marker label and drives each observed change
//! through the reconciliation pipeline. Reconciliations run inline on the controller task, so no two
//! reconciliations of the same object, or of any objects, ever overlap. Failed reconciliations are
//! rescheduled with exponential backoff.

pub mod store;
pub mod tracker;
#[cfg(test)]
mod tracker_test;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::prelude::*;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::watcher::{watcher, Config as WatcherConfig, Error as WatcherError, Event};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use crate::config::Config;
use crate::k8s::store::ConfigMapClient;
use crate::k8s::tracker::{ChangeTracker, ReconcileTask};
use crate::reconciler::Reconciler;
use kube_xds_core::SnapshotPublisher;

/// The base delay used when rescheduling a failed reconciliation.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// The maximum delay used when rescheduling a failed reconciliation.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);
/// The delay applied after a watcher error before polling the watcher again.
const WATCHER_ERROR_DELAY: Duration = Duration::from_secs(10);

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// Kubernetes controller for watching config objects.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// Set once the watcher has completed its initial listing.
    ready: Arc<AtomicBool>,

    /// The change tracker driving the reconciliation pipeline.
    tracker: ChangeTracker<ConfigMapClient<Client>>,
    /// A channel of reconciliation tasks.
    tasks_tx: mpsc::Sender<ReconcileTask>,
    /// A channel of reconciliation tasks.
    tasks_rx: ReceiverStream<ReconcileTask>,
}

impl Controller {
    /// Create a new instance.
    pub fn new(
        client: Client, config: Arc<Config>, publisher: SnapshotPublisher, ready: Arc<AtomicBool>, shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let store = ConfigMapClient::new(client.clone(), config.config_key.clone(), config.marker_label.clone());
        let tracker = ChangeTracker::new(config.marker_label.clone(), Reconciler::new(store, publisher));
        let (tasks_tx, tasks_rx) = mpsc::channel(1000);
        Self {
            client,
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            ready,
            tracker,
            tasks_tx,
            tasks_rx: ReceiverStream::new(tasks_rx),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let api: Api<ConfigMap> = match &self.config.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = WatcherConfig::default().labels(self.config.label_selector());
        let configmaps_watcher = watcher(api, params);
        tokio::pin!(configmaps_watcher);

        tracing::info!(
            namespace = self.config.watch_namespace.as_deref().unwrap_or("*"),
            selector = self.config.label_selector(),
            "k8s controller initialized"
        );
        loop {
            tokio::select! {
                Some(k8s_event_res) = configmaps_watcher.next() => self.handle_configmap_event(k8s_event_res).await,
                Some(task) = self.tasks_rx.next() => {
                    if let Some((retry, delay)) = self.tracker.reconcile(task).await {
                        self.spawn_reconcile_task(retry, Some(delay));
                    }
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    async fn handle_configmap_event(&mut self, res: EventResult<ConfigMap>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from ConfigMap k8s watcher");
                tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        match event {
            Event::Apply(cm) | Event::InitApply(cm) => {
                if let Some(task) = self.tracker.applied(&cm) {
                    self.spawn_reconcile_task(task, None);
                }
            }
            Event::Delete(cm) => self.tracker.deleted(&cm),
            Event::Init => tracing::debug!("ConfigMap watcher (re)listing"),
            Event::InitDone => {
                if !self.ready.swap(true, Ordering::SeqCst) {
                    tracing::info!(objects = self.tracker.tracked(), "initial config object sync complete");
                }
            }
        }
    }

    /// Spawn a task which emits a new reconciliation task, optionally after a delay.
    ///
    /// This indirection keeps the task queue bounded without blocking the controller, which is the
    /// only consumer of the queue, when the queue is full.
    fn spawn_reconcile_task(&self, task: ReconcileTask, delay: Option<Duration>) {
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _res = tx.send(task).await;
        });
    }
}

/// The delay before retrying a reconciliation which has already failed `attempt` times.
///
/// Doubles from 500ms per attempt, capped at 5 minutes.
pub fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY.saturating_mul(1u32 << attempt.min(20)).min(RETRY_MAX_DELAY)
}

/// Extend the given duration by a random fraction of itself, up to `factor`.
pub(crate) fn jitter(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    base.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..factor))
}
