use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use maplit::btreemap;

use crate::k8s::store::{ConfigMapApi, ConfigRef};
use kube_xds_core::{XdsError, XdsResult, DEFAULT_CONFIG_KEY, LABEL_XDS_KIND};

/// A mutation applied by a simulated concurrent writer.
type Mutation = Box<dyn FnOnce(&mut ConfigMap) + Send>;

/// An in-memory `ConfigMapApi` with K8s resource version semantics.
#[derive(Clone, Default)]
pub struct FakeConfigMapApi {
    inner: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ConfigRef, ConfigMap>,
    last_version: u64,
    /// Writes by other clients, each applied just before one of our own writes.
    concurrent_writes: VecDeque<Mutation>,
    writes: u32,
}

impl FakeState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    /// Apply the next pending concurrent write, if any, returning true if one was applied.
    fn apply_concurrent_write(&mut self, target: &ConfigRef) -> bool {
        let mutation = match self.concurrent_writes.pop_front() {
            Some(mutation) => mutation,
            None => return false,
        };
        let mut cm = self.objects.get(target).cloned().unwrap_or_else(|| new_config_map(target));
        mutation(&mut cm);
        cm.metadata.resource_version = Some(self.next_version());
        self.objects.insert(target.clone(), cm);
        true
    }
}

impl FakeConfigMapApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the given object as-is, assigning it a new resource version which is returned.
    pub fn insert(&self, mut cm: ConfigMap) -> String {
        let mut state = self.inner.lock().unwrap();
        let target = ConfigRef::from_object(&cm).expect("test objects must have a namespace & name");
        let version = state.next_version();
        cm.metadata.resource_version = Some(version.clone());
        state.objects.insert(target, cm);
        version
    }

    /// Get the stored object.
    pub fn get(&self, target: &ConfigRef) -> Option<ConfigMap> {
        self.inner.lock().unwrap().objects.get(target).cloned()
    }

    /// Simulate another client writing the target object just before our next write.
    pub fn concurrent_write(&self, mutation: impl FnOnce(&mut ConfigMap) + Send + 'static) {
        self.inner.lock().unwrap().concurrent_writes.push_back(Box::new(mutation));
    }

    /// The number of successful writes made through this API.
    pub fn writes(&self) -> u32 {
        self.inner.lock().unwrap().writes
    }
}

#[async_trait]
impl ConfigMapApi for FakeConfigMapApi {
    async fn get_opt(&self, target: &ConfigRef) -> XdsResult<Option<ConfigMap>> {
        Ok(self.get(target))
    }

    async fn create(&self, target: &ConfigRef, cm: &ConfigMap) -> XdsResult<ConfigMap> {
        let mut state = self.inner.lock().unwrap();
        state.apply_concurrent_write(target);
        if state.objects.contains_key(target) {
            return Err(XdsError::StoreConflict(format!("configmaps {:?} already exists", target.name)));
        }
        let mut cm = cm.clone();
        cm.metadata.resource_version = Some(state.next_version());
        state.objects.insert(target.clone(), cm.clone());
        state.writes += 1;
        Ok(cm)
    }

    async fn replace(&self, target: &ConfigRef, cm: &ConfigMap) -> XdsResult<ConfigMap> {
        let mut state = self.inner.lock().unwrap();
        state.apply_concurrent_write(target);
        let current = match state.objects.get(target) {
            Some(current) => current,
            None => {
                let err = std::io::Error::new(std::io::ErrorKind::NotFound, format!("configmaps {:?} not found", target.name));
                return Err(XdsError::TransientIo(Box::new(err)));
            }
        };
        if current.metadata.resource_version != cm.metadata.resource_version {
            return Err(XdsError::StoreConflict(format!(
                "the object has been modified; please apply your changes to the latest version and try again: {}",
                target
            )));
        }
        let mut cm = cm.clone();
        cm.metadata.resource_version = Some(state.next_version());
        state.objects.insert(target.clone(), cm.clone());
        state.writes += 1;
        Ok(cm)
    }
}

/// An empty object for the given reference.
pub fn new_config_map(target: &ConfigRef) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A marked object holding the given bootstrap document text.
pub fn bootstrap_config_map(target: &ConfigRef, content: &str) -> ConfigMap {
    let mut cm = new_config_map(target);
    cm.metadata.labels = Some(btreemap! {LABEL_XDS_KIND.to_string() => String::new()});
    cm.data = Some(btreemap! {DEFAULT_CONFIG_KEY.to_string() => content.to_string()});
    cm
}
