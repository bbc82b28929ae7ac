//! Consistency-checked publication of resource mappings.

use std::sync::Arc;

use crate::bootstrap::Node;
use crate::cache::SnapshotCache;
use crate::error::XdsResult;
use crate::resource::ResourceMap;
use crate::snapshot::Snapshot;

/// Publishes snapshots into a snapshot cache, keyed by node id.
#[derive(Clone)]
pub struct SnapshotPublisher {
    cache: Arc<dyn SnapshotCache>,
}

impl SnapshotPublisher {
    /// Create a new instance publishing into the given cache.
    pub fn new(cache: Arc<dyn SnapshotCache>) -> Self {
        Self { cache }
    }

    /// Build a snapshot of the given mapping & publish it under the given identity.
    ///
    /// The snapshot is only handed to the cache once it has passed its consistency check, so a
    /// failed publish leaves the cache untouched for this identity. No retries are performed here.
    #[tracing::instrument(level = "debug", skip(self, identity, resources), fields(node_id = %identity.id), err)]
    pub fn publish(&self, identity: &Node, resources: ResourceMap, version: &str) -> XdsResult<()> {
        identity.validate()?;
        let snapshot = Snapshot::new(version, resources)?;
        snapshot.consistent()?;
        self.cache.set_snapshot(&identity.id, snapshot)?;
        tracing::info!(node_id = %identity.id, cluster = %identity.cluster, version, "published snapshot");
        Ok(())
    }
}
