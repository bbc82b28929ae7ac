//! The Envoy bootstrap document stored in config objects.
//!
//! Only the parts of the schema needed by the pipeline are typed: the node identity and the three
//! static resource collections. Everything else is carried opaquely so that a decode/encode cycle
//! does not drop operator data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{XdsError, XdsResult};
use crate::resource::{Cluster, Listener, Secret};

/// The desired bootstrap configuration for one data-plane process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// The identity of the process this document is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    /// The statically defined resources of this document.
    #[serde(default, alias = "static_resources", skip_serializing_if = "Option::is_none")]
    pub static_resources: Option<StaticResources>,
    /// All other bootstrap fields, carried as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The identity a data-plane process presents when requesting configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// The process id, also used as the snapshot cache key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// The logical cluster name of the process.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
    /// All other node fields (metadata, locality &c).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The static resource collections of a bootstrap document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticResources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<Cluster>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Bootstrap {
    /// Decode a bootstrap document from its JSON text encoding.
    pub fn decode(content: &str) -> XdsResult<Self> {
        serde_json::from_str(content).map_err(|source| XdsError::Decode {
            content: content.to_string(),
            source,
        })
    }

    /// Encode this document as indented JSON text.
    pub fn encode(&self) -> XdsResult<String> {
        serde_json::to_string_pretty(self).map_err(XdsError::Encode)
    }

    /// The identity of this document, or an empty identity if none is set.
    pub fn identity(&self) -> Node {
        self.node.clone().unwrap_or_default()
    }

    /// Check that the identity fields required for publication are populated.
    pub fn validate_identity(&self) -> XdsResult<()> {
        match &self.node {
            Some(node) => node.validate(),
            None => Err(XdsError::Validation("node.id is required".into())),
        }
    }

    /// Check if this document has neither an identity nor any resources.
    ///
    /// This is the shape returned when fetching a config object which does not exist.
    pub fn is_empty(&self) -> bool {
        let no_identity = self.node.as_ref().map(|node| node.id.is_empty() && node.cluster.is_empty()).unwrap_or(true);
        let no_resources = self
            .static_resources
            .as_ref()
            .map(|res| res.listeners.is_empty() && res.clusters.is_empty() && res.secrets.is_empty())
            .unwrap_or(true);
        no_identity && no_resources
    }
}

impl Node {
    /// Create a new identity from the given id & cluster.
    pub fn new(id: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cluster: cluster.into(),
            extra: Default::default(),
        }
    }

    /// Check that both the id & cluster of this identity are populated.
    pub fn validate(&self) -> XdsResult<()> {
        if self.id.is_empty() {
            return Err(XdsError::Validation("node.id is required".into()));
        }
        if self.cluster.is_empty() {
            return Err(XdsError::Validation("node.cluster is required".into()));
        }
        Ok(())
    }
}
