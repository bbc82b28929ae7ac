//! Core types of the kube-xds control plane.
//!
//! This crate holds everything in the reconciliation pipeline which does not need to talk to
//! Kubernetes: the bootstrap document model, translation into typed resource collections, snapshot
//! construction & consistency checking, and the snapshot cache.

pub mod bootstrap;
pub mod cache;
pub mod error;
pub mod publisher;
pub mod resource;
pub mod snapshot;

#[cfg(test)]
mod bootstrap_test;

pub use bootstrap::{Bootstrap, Node, StaticResources};
pub use cache::{MemorySnapshotCache, SnapshotCache};
pub use error::{XdsError, XdsResult};
pub use publisher::SnapshotPublisher;
pub use resource::{translate, Cluster, Listener, Reference, Resource, ResourceMap, ResourceType, Secret, TypedResource};
pub use snapshot::Snapshot;

/// The config object key under which the bootstrap document is stored.
pub const DEFAULT_CONFIG_KEY: &str = "envoy.json";
/// The label which marks config objects as holding a bootstrap document.
///
/// Only the presence of the label is significant, its value is ignored.
pub const LABEL_XDS_KIND: &str = "xds.pf9.io/kind";
