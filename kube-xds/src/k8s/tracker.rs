//! Change tracking for watched config objects.
//!
//! Decides which change notifications turn into reconciliation tasks, and which tasks are still
//! current when they come up for processing.

use std::collections::HashMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use crate::k8s::retry_delay;
use crate::k8s::store::{has_marker_label, ConfigRef, ConfigStore};
use crate::reconciler::{ReconcileOutcome, Reconciler};

/// A request to reconcile a config object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileTask {
    /// The object to reconcile.
    pub target: ConfigRef,
    /// The object version which triggered this task.
    pub version: String,
    /// The number of failed attempts which preceded this task.
    pub attempt: u32,
}

/// Tracks the observed & reconciled versions of config objects.
pub struct ChangeTracker<S> {
    /// The label marking config objects which hold a document.
    marker_label: String,
    /// The reconciliation pipeline.
    reconciler: Reconciler<S>,

    /// The version of each config object as of its last observed change.
    observed: HashMap<ConfigRef, String>,
    /// The version of each config object as of its last successful reconciliation.
    reconciled: HashMap<ConfigRef, String>,
}

impl<S: ConfigStore> ChangeTracker<S> {
    /// Create a new instance.
    pub fn new(marker_label: impl Into<String>, reconciler: Reconciler<S>) -> Self {
        Self {
            marker_label: marker_label.into(),
            reconciler,
            observed: Default::default(),
            reconciled: Default::default(),
        }
    }

    /// The number of config objects currently being tracked.
    pub fn tracked(&self) -> usize {
        self.observed.len()
    }

    /// Record an applied config object, returning a task if the object needs reconciliation.
    #[tracing::instrument(level = "debug", skip(self, cm), fields(object = ?cm.metadata.name))]
    pub fn applied(&mut self, cm: &ConfigMap) -> Option<ReconcileTask> {
        // Objects can lose the label between listing & delivery.
        if !has_marker_label(cm, &self.marker_label) {
            tracing::debug!("ignoring config object without marker label");
            return None;
        }
        let target = ConfigRef::from_object(cm)?; // K8s requires name & namespace.
        let version = cm.resource_version().unwrap_or_default();
        if self.reconciled.get(&target) == Some(&version) {
            tracing::debug!(%version, "config object already reconciled at this version");
            return None;
        }
        self.observed.insert(target.clone(), version.clone());
        Some(ReconcileTask { target, version, attempt: 0 })
    }

    /// Forget a deleted config object, which drops any of its pending tasks.
    #[tracing::instrument(level = "debug", skip(self, cm), fields(object = ?cm.metadata.name))]
    pub fn deleted(&mut self, cm: &ConfigMap) {
        let target = match ConfigRef::from_object(cm) {
            Some(target) => target,
            None => return,
        };
        // The published snapshot is left in place. Proxies keep their last known configuration.
        tracing::info!(object = %target, "config object deleted, retaining published snapshot");
        self.observed.remove(&target);
        self.reconciled.remove(&target);
    }

    /// Run the given task, returning the retry task & its delay if the task failed.
    #[tracing::instrument(level = "debug", skip(self, task), fields(object = %task.target, attempt = task.attempt))]
    pub async fn reconcile(&mut self, task: ReconcileTask) -> Option<(ReconcileTask, Duration)> {
        // Tasks for deleted objects, superseded by a newer change, or already handled are dropped.
        if self.observed.get(&task.target) != Some(&task.version) || self.reconciled.get(&task.target) == Some(&task.version) {
            tracing::debug!("dropping superseded reconcile task");
            return None;
        }

        match self.reconciler.reconcile(&task.target).await {
            Ok(ReconcileOutcome::Published { node_id, version }) => {
                tracing::debug!(%node_id, %version, "config object reconciled");
                self.reconciled.insert(task.target, version);
                None
            }
            Ok(ReconcileOutcome::Skipped) => {
                self.reconciled.insert(task.target, task.version);
                None
            }
            Err(err) => {
                let delay = retry_delay(task.attempt);
                tracing::error!(error = %err, retry_in = ?delay, "error reconciling config object");
                let task = ReconcileTask {
                    attempt: task.attempt.saturating_add(1),
                    ..task
                };
                Some((task, delay))
            }
        }
    }
}
