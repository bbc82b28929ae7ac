//! The snapshot cache shared between the publisher & the discovery server.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{XdsError, XdsResult};
use crate::snapshot::Snapshot;

/// A cache of snapshots keyed by node id.
pub trait SnapshotCache: Send + Sync {
    /// Set the snapshot for the given node, replacing any previous snapshot.
    ///
    /// The replacement must be atomic: concurrent readers observe either the previous snapshot or
    /// the new one.
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> XdsResult<()>;

    /// Get the current snapshot of the given node, if any.
    fn get_snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>>;
}

/// An in-memory snapshot cache.
///
/// The full map is swapped on every update, so readers never block & never observe a partially
/// applied update.
#[derive(Default)]
pub struct MemorySnapshotCache {
    snapshots: ArcSwap<HashMap<String, Arc<Snapshot>>>,
}

impl MemorySnapshotCache {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ids of all nodes which have a snapshot, sorted.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.snapshots.load().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> XdsResult<()> {
        if node_id.is_empty() {
            return Err(XdsError::Validation("snapshot cache key (node.id) must not be empty".into()));
        }
        let snapshot = Arc::new(snapshot);
        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(node_id.to_string(), snapshot.clone());
            next
        });
        tracing::debug!(node_id, version = snapshot.version(), "snapshot set");
        Ok(())
    }

    fn get_snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.load().get(node_id).cloned()
    }
}
