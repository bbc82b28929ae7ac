//! ConfigMap backed storage of bootstrap documents.
//!
//! Each config object holds exactly one bootstrap document under a single well-known key. Writes
//! are always merges against a freshly read object, as operators & other controllers may add their
//! own keys & labels to the same object.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::client::Client;
use kube::ResourceExt;

use crate::k8s::jitter;
use kube_xds_core::{Bootstrap, XdsError, XdsResult};

/// The number of attempts made to write a config object in the face of conflicts.
///
/// Mirrors the K8s client-go `retry.DefaultRetry` backoff.
const CONFLICT_RETRY_STEPS: u32 = 5;
/// The delay between conflicting write attempts, before jitter.
const CONFLICT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// A reference to a config object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigRef {
    pub namespace: String,
    pub name: String,
}

impl ConfigRef {
    /// Create a new instance.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a reference to the given object, if it carries both a namespace and a name.
    pub fn from_object(cm: &ConfigMap) -> Option<Self> {
        Some(Self {
            namespace: cm.namespace()?,
            name: cm.metadata.name.clone()?,
        })
    }
}

impl fmt::Display for ConfigRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object level access to ConfigMaps.
#[async_trait]
pub trait ConfigMapApi: Send + Sync {
    /// Get the target object, returning `None` if it does not exist.
    async fn get_opt(&self, target: &ConfigRef) -> XdsResult<Option<ConfigMap>>;

    /// Create the target object, failing with a conflict if it already exists.
    async fn create(&self, target: &ConfigRef, cm: &ConfigMap) -> XdsResult<ConfigMap>;

    /// Replace the target object, failing with a conflict if its resource version is stale.
    async fn replace(&self, target: &ConfigRef, cm: &ConfigMap) -> XdsResult<ConfigMap>;
}

#[async_trait]
impl ConfigMapApi for Client {
    async fn get_opt(&self, target: &ConfigRef) -> XdsResult<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.clone(), &target.namespace);
        api.get_opt(&target.name).await.map_err(map_kube_error)
    }

    async fn create(&self, target: &ConfigRef, cm: &ConfigMap) -> XdsResult<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.clone(), &target.namespace);
        api.create(&PostParams::default(), cm).await.map_err(map_kube_error)
    }

    async fn replace(&self, target: &ConfigRef, cm: &ConfigMap) -> XdsResult<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.clone(), &target.namespace);
        api.replace(&target.name, &PostParams::default(), cm).await.map_err(map_kube_error)
    }
}

/// Classify a K8s client error, separating optimistic concurrency conflicts from all else.
fn map_kube_error(err: kube::Error) -> XdsError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => XdsError::StoreConflict(resp.message),
        err => XdsError::TransientIo(Box::new(err)),
    }
}

/// Storage of bootstrap documents.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the document held by the target object along with the object's version token.
    ///
    /// A missing object yields an empty document & an empty version, never an error.
    async fn fetch(&self, target: &ConfigRef) -> XdsResult<(Bootstrap, String)>;

    /// Write the given document into the target object, creating it as needed.
    async fn persist(&self, target: &ConfigRef, doc: &Bootstrap) -> XdsResult<()>;
}

/// A `ConfigStore` backed by ConfigMaps.
pub struct ConfigMapClient<A> {
    api: A,
    /// The key under which the document is stored.
    config_key: String,
    /// The label marking objects which hold a document.
    marker_label: String,
}

impl<A: ConfigMapApi> ConfigMapClient<A> {
    /// Create a new instance.
    pub fn new(api: A, config_key: impl Into<String>, marker_label: impl Into<String>) -> Self {
        Self {
            api,
            config_key: config_key.into(),
            marker_label: marker_label.into(),
        }
    }

    /// Perform a single read-modify-write cycle of the target object.
    async fn upsert(&self, target: &ConfigRef, content: &str) -> XdsResult<()> {
        let existing = match self.api.get_opt(target).await? {
            Some(existing) => existing,
            None => {
                let mut cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(target.name.clone()),
                        namespace: Some(target.namespace.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                merge_config(&mut cm, &self.config_key, content, &self.marker_label);
                self.api.create(target, &cm).await?;
                tracing::info!(object = %target, "created config object");
                return Ok(());
            }
        };

        let mut cm = existing.clone();
        merge_config(&mut cm, &self.config_key, content, &self.marker_label);
        if cm == existing {
            tracing::debug!(object = %target, "config object is up-to-date, no-op");
            return Ok(());
        }
        // The read resource version is carried through, so a concurrent write yields a conflict.
        self.api.replace(target, &cm).await?;
        tracing::info!(object = %target, "updated config object");
        Ok(())
    }
}

#[async_trait]
impl<A: ConfigMapApi> ConfigStore for ConfigMapClient<A> {
    #[tracing::instrument(level = "debug", skip(self, target), fields(object = %target), err)]
    async fn fetch(&self, target: &ConfigRef) -> XdsResult<(Bootstrap, String)> {
        let cm = match self.api.get_opt(target).await? {
            Some(cm) => cm,
            None => {
                tracing::debug!("config object not found, using empty bootstrap config");
                return Ok((Bootstrap::default(), String::new()));
            }
        };
        let version = cm.resource_version().unwrap_or_default();
        let content = match cm.data.as_ref().and_then(|data| data.get(&self.config_key)) {
            Some(content) => content,
            None => {
                tracing::debug!(key = %self.config_key, "config object has no bootstrap config key, using empty bootstrap config");
                return Ok((Bootstrap::default(), version));
            }
        };
        let doc = Bootstrap::decode(content).map_err(|err| {
            tracing::error!(error = %err, %content, "error decoding bootstrap config");
            err
        })?;
        Ok((doc, version))
    }

    #[tracing::instrument(level = "debug", skip(self, target, doc), fields(object = %target), err)]
    async fn persist(&self, target: &ConfigRef, doc: &Bootstrap) -> XdsResult<()> {
        doc.validate_identity()?;
        let content = doc.encode()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.upsert(target, &content).await {
                Err(err) if err.is_conflict() && attempt < CONFLICT_RETRY_STEPS => {
                    let delay = jitter(CONFLICT_RETRY_DELAY, 0.1);
                    tracing::debug!(error = %err, attempt, "conflict writing config object, retrying");
                    tokio::time::sleep(delay).await;
                }
                res => return res,
            }
        }
    }
}

/// Merge the given document content & the marker label into the given object.
///
/// All other data & labels of the object are preserved, as is the value of an existing marker label.
pub fn merge_config(cm: &mut ConfigMap, config_key: &str, content: &str, marker_label: &str) {
    cm.data.get_or_insert_with(BTreeMap::new).insert(config_key.to_string(), content.to_string());
    cm.metadata.labels.get_or_insert_with(BTreeMap::new).entry(marker_label.to_string()).or_default();
}

/// Check if the given object carries the marker label, with any value.
pub fn has_marker_label(cm: &ConfigMap, marker_label: &str) -> bool {
    cm.labels().contains_key(marker_label)
}
