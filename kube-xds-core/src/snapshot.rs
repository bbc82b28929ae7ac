//! Immutable, versioned snapshots of resource collections.

use std::collections::{BTreeMap, HashSet};

use crate::error::{XdsError, XdsResult};
use crate::resource::{Resource, ResourceMap, ResourceType};

/// An immutable, versioned bundle of all resource collections for one identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    version: String,
    resources: BTreeMap<ResourceType, Vec<Resource>>,
}

impl Snapshot {
    /// Create a new snapshot from the given resource mapping.
    ///
    /// Resource names must be non-empty & unique within their type, and every resource must be
    /// filed under its own type. All resource types are present in the output.
    pub fn new(version: impl Into<String>, mut resources: ResourceMap) -> XdsResult<Self> {
        for ty in ResourceType::ALL {
            let items = resources.entry(ty).or_default();
            let mut seen = HashSet::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                if item.resource_type() != ty {
                    return Err(XdsError::Consistency(format!(
                        "{} {:?} filed under the {} collection",
                        item.resource_type(),
                        item.name(),
                        ty
                    )));
                }
                if item.name().is_empty() {
                    return Err(XdsError::Consistency(format!("{} at index {} has no name", ty, idx)));
                }
                if !seen.insert(item.name()) {
                    return Err(XdsError::Consistency(format!("duplicate {} name {:?}", ty, item.name())));
                }
            }
        }
        Ok(Self {
            version: version.into(),
            resources,
        })
    }

    /// The version of this snapshot.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All resources of the given type, in source order.
    pub fn resources(&self, ty: ResourceType) -> &[Resource] {
        self.resources.get(&ty).map(Vec::as_slice).unwrap_or_default()
    }

    /// Get a resource by type & name.
    pub fn get(&self, ty: ResourceType, name: &str) -> Option<&Resource> {
        self.resources(ty).iter().find(|res| res.name() == name)
    }

    /// Check that every reference between resources of this snapshot resolves within it.
    pub fn consistent(&self) -> XdsResult<()> {
        for res in self.resources.values().flatten() {
            for reference in res.references() {
                if self.get(reference.resource_type, &reference.name).is_none() {
                    return Err(XdsError::Consistency(format!(
                        "{} {:?} references missing {}",
                        res.resource_type(),
                        res.name(),
                        reference
                    )));
                }
            }
        }
        Ok(())
    }
}
