//! The fetch, translate & publish pipeline run for each changed config object.

use std::time::Instant;

use crate::k8s::store::{ConfigRef, ConfigStore};
use kube_xds_core::{translate, SnapshotPublisher, XdsResult};

pub const METRIC_RECONCILIATIONS: &str = "kube_xds_reconciliations_total";
pub const METRIC_RECONCILE_DURATION: &str = "kube_xds_reconcile_duration_seconds";
pub const METRIC_SNAPSHOTS_PUBLISHED: &str = "kube_xds_snapshots_published_total";

/// The outcome of a successful reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A snapshot was published under the given node id.
    Published { node_id: String, version: String },
    /// The config object held no document, nothing was published.
    Skipped,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::Skipped => "skipped",
        }
    }
}

/// Reconciles config objects into published snapshots.
pub struct Reconciler<S> {
    store: S,
    publisher: SnapshotPublisher,
}

impl<S: ConfigStore> Reconciler<S> {
    /// Create a new instance.
    pub fn new(store: S, publisher: SnapshotPublisher) -> Self {
        Self { store, publisher }
    }

    /// Reconcile the target config object.
    ///
    /// The current state of the object is always fetched, so a stale change notification still
    /// yields a snapshot of the latest document. A missing object, or one holding no document, is
    /// skipped and the previously published snapshot, if any, stays in place.
    #[tracing::instrument(level = "debug", skip(self, target), fields(object = %target))]
    pub async fn reconcile(&self, target: &ConfigRef) -> XdsResult<ReconcileOutcome> {
        let start = Instant::now();
        let res = self.reconcile_inner(target).await;
        metrics::histogram!(METRIC_RECONCILE_DURATION).record(start.elapsed().as_secs_f64());
        let outcome = match &res {
            Ok(outcome) => outcome.label(),
            Err(err) => {
                metrics::counter!(METRIC_RECONCILIATIONS, "outcome" => "error", "error" => err.label()).increment(1);
                return res;
            }
        };
        metrics::counter!(METRIC_RECONCILIATIONS, "outcome" => outcome).increment(1);
        res
    }

    async fn reconcile_inner(&self, target: &ConfigRef) -> XdsResult<ReconcileOutcome> {
        let (doc, version) = self.store.fetch(target).await?;
        if doc.is_empty() {
            tracing::debug!("config object holds no bootstrap config, skipping");
            return Ok(ReconcileOutcome::Skipped);
        }

        let resources = translate(&doc);
        let identity = doc.identity();
        self.publisher.publish(&identity, resources, &version)?;
        metrics::counter!(METRIC_SNAPSHOTS_PUBLISHED).increment(1);
        Ok(ReconcileOutcome::Published {
            node_id: identity.id,
            version,
        })
    }
}
