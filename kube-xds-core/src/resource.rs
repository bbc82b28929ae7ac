//! Typed xDS resources & translation of bootstrap documents into resource collections.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bootstrap::Bootstrap;

/// A mapping of resource type to an ordered collection of resources of that type.
pub type ResourceMap = BTreeMap<ResourceType, Vec<Resource>>;

/// The resource types distributed by this control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Listener,
    Cluster,
    Secret,
}

impl ResourceType {
    /// All resource types, in the order they appear in a snapshot.
    pub const ALL: [ResourceType; 3] = [ResourceType::Listener, ResourceType::Cluster, ResourceType::Secret];

    /// The protocol type URL of this resource type.
    pub fn type_url(&self) -> &'static str {
        match self {
            Self::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            Self::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            Self::Secret => "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret",
        }
    }

    /// Resolve a resource type from its protocol type URL.
    pub fn from_type_url(type_url: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| ty.type_url() == type_url)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Cluster => "cluster",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capability shared by all resources: a name and a type tag.
pub trait TypedResource: Clone {
    /// The type tag of this resource.
    const TYPE: ResourceType;

    /// The name of this resource, unique within its type.
    fn name(&self) -> &str;

    /// The opaque body of this resource, everything other than its name.
    fn config(&self) -> &Map<String, Value>;

    /// Erase the concrete type of this resource.
    fn into_resource(self) -> Resource;
}

macro_rules! typed_resource {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub name: String,
            #[serde(flatten)]
            pub config: Map<String, Value>,
        }

        impl $name {
            /// Create a new instance with the given name and body.
            pub fn new(name: impl Into<String>, config: Map<String, Value>) -> Self {
                Self { name: name.into(), config }
            }
        }

        impl TypedResource for $name {
            const TYPE: ResourceType = ResourceType::$name;

            fn name(&self) -> &str {
                &self.name
            }

            fn config(&self) -> &Map<String, Value> {
                &self.config
            }

            fn into_resource(self) -> Resource {
                Resource::$name(self)
            }
        }
    };
}

typed_resource!(
    /// A connection listener definition.
    Listener
);
typed_resource!(
    /// An upstream cluster definition.
    Cluster
);
typed_resource!(
    /// Secret material, such as TLS certificates & validation contexts.
    Secret
);

/// A resource of any type.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    Listener(Listener),
    Cluster(Cluster),
    Secret(Secret),
}

impl Resource {
    pub fn name(&self) -> &str {
        match self {
            Self::Listener(inner) => inner.name(),
            Self::Cluster(inner) => inner.name(),
            Self::Secret(inner) => inner.name(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Listener(_) => ResourceType::Listener,
            Self::Cluster(_) => ResourceType::Cluster,
            Self::Secret(_) => ResourceType::Secret,
        }
    }

    fn config(&self) -> &Map<String, Value> {
        match self {
            Self::Listener(inner) => inner.config(),
            Self::Cluster(inner) => inner.config(),
            Self::Secret(inner) => inner.config(),
        }
    }

    /// All references this resource makes to other resources, in sorted order.
    pub fn references(&self) -> BTreeSet<Reference> {
        let mut refs = BTreeSet::new();
        collect_object_references("", self.config(), &mut refs);
        refs
    }

    /// Encode this resource as a protobuf `Any` JSON object.
    pub fn to_any(&self) -> Value {
        let mut any = Map::new();
        any.insert("@type".into(), Value::String(self.resource_type().type_url().into()));
        any.insert("name".into(), Value::String(self.name().into()));
        any.extend(self.config().iter().map(|(key, val)| (key.clone(), val.clone())));
        Value::Object(any)
    }
}

/// A reference from one resource to another resource by type & name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub resource_type: ResourceType,
    pub name: String,
}

impl Reference {
    fn new(resource_type: ResourceType, name: &str) -> Self {
        Self {
            resource_type,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.resource_type, self.name)
    }
}

/// Translate the given document into a mapping of its resource collections.
///
/// All resource types are always present in the output, even when empty. Cross references are not
/// validated here, see `Snapshot::consistent`.
pub fn translate(doc: &Bootstrap) -> ResourceMap {
    let resources = doc.static_resources.as_ref();
    let mut map = ResourceMap::new();
    map.insert(ResourceType::Listener, resources.map(|res| to_resources(&res.listeners)).unwrap_or_default());
    map.insert(ResourceType::Cluster, resources.map(|res| to_resources(&res.clusters)).unwrap_or_default());
    map.insert(ResourceType::Secret, resources.map(|res| to_resources(&res.secrets)).unwrap_or_default());
    map
}

/// Convert a slice of typed resources into a collection of type-erased resources.
pub fn to_resources<T: TypedResource>(items: &[T]) -> Vec<Resource> {
    items.iter().cloned().map(T::into_resource).collect()
}

/// Walk the given value collecting references to clusters & secrets.
fn collect_references(parent: &str, value: &Value, refs: &mut BTreeSet<Reference>) {
    match value {
        Value::Object(obj) => collect_object_references(parent, obj, refs),
        Value::Array(items) => {
            for item in items {
                collect_references(parent, item, refs);
            }
        }
        _ => (),
    }
}

/// Collect the references made by the fields of the given object, which was found under `parent`.
///
/// Both the proto JSON (camelCase) and original (snake_case) field spellings are recognized.
/// Metadata is user defined & never searched.
fn collect_object_references(parent: &str, obj: &Map<String, Value>, refs: &mut BTreeSet<Reference>) {
    for (key, val) in obj {
        if is_metadata_field(key) {
            continue;
        }
        match (key.as_str(), val) {
            // TCP proxy & route actions.
            ("cluster", Value::String(name)) => {
                refs.insert(Reference::new(ResourceType::Cluster, name));
            }
            ("clusterName" | "cluster_name", Value::String(name)) if matches!(parent, "envoyGrpc" | "envoy_grpc") => {
                refs.insert(Reference::new(ResourceType::Cluster, name));
            }
            ("clusters", Value::Array(items)) => {
                for item in items {
                    match item {
                        // Aggregate clusters.
                        Value::String(name) => {
                            refs.insert(Reference::new(ResourceType::Cluster, name));
                        }
                        Value::Object(weighted) if matches!(parent, "weightedClusters" | "weighted_clusters") => {
                            if let Some(Value::String(name)) = weighted.get("name") {
                                refs.insert(Reference::new(ResourceType::Cluster, name));
                            }
                        }
                        _ => (),
                    }
                }
            }
            ("tlsCertificateSdsSecretConfigs" | "tls_certificate_sds_secret_configs", Value::Array(items)) => {
                for item in items {
                    if let Some(Value::String(name)) = item.get("name") {
                        refs.insert(Reference::new(ResourceType::Secret, name));
                    }
                }
            }
            ("validationContextSdsSecretConfig" | "validation_context_sds_secret_config", Value::Object(sds)) => {
                if let Some(Value::String(name)) = sds.get("name") {
                    refs.insert(Reference::new(ResourceType::Secret, name));
                }
            }
            _ => (),
        }
        collect_references(key, val, refs);
    }
}

/// Check if the given field holds free-form metadata rather than resource configuration.
fn is_metadata_field(key: &str) -> bool {
    matches!(
        key,
        "metadata" | "filterMetadata" | "filter_metadata" | "typedFilterMetadata" | "typed_filter_metadata"
    )
}
