use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;

use crate::fixtures::{bootstrap_config_map, FakeConfigMapApi};
use crate::k8s::store::{ConfigMapClient, ConfigRef};
use crate::k8s::tracker::ChangeTracker;
use crate::reconciler::Reconciler;
use kube_xds_core::{MemorySnapshotCache, ResourceType, SnapshotCache, SnapshotPublisher, DEFAULT_CONFIG_KEY, LABEL_XDS_KIND};

const BODY_V1: &str = r#"{"node":{"id":"n1","cluster":"c1"},"staticResources":{"clusters":[{"name":"c1"}]}}"#;
const BODY_V2: &str = r#"{"node":{"id":"n1","cluster":"c1"},"staticResources":{"clusters":[{"name":"c2"}]}}"#;

struct Fixture {
    api: FakeConfigMapApi,
    cache: Arc<MemorySnapshotCache>,
    tracker: ChangeTracker<ConfigMapClient<FakeConfigMapApi>>,
    target: ConfigRef,
}

impl Fixture {
    fn new() -> Self {
        let api = FakeConfigMapApi::new();
        let cache = Arc::new(MemorySnapshotCache::new());
        let store = ConfigMapClient::new(api.clone(), DEFAULT_CONFIG_KEY, LABEL_XDS_KIND);
        let reconciler = Reconciler::new(store, SnapshotPublisher::new(cache.clone()));
        Self {
            api,
            cache,
            tracker: ChangeTracker::new(LABEL_XDS_KIND, reconciler),
            target: ConfigRef::new("default", "proxy-a"),
        }
    }

    /// Store a new version of the target object, returning the object as delivered by a watch.
    fn store(&self, body: &str) -> Result<ConfigMap> {
        self.api.insert(bootstrap_config_map(&self.target, body));
        self.api.get(&self.target).context("expected stored object")
    }

    fn published_clusters(&self) -> Option<(String, Vec<String>)> {
        let snapshot = self.cache.get_snapshot("n1")?;
        let names = snapshot.resources(ResourceType::Cluster).iter().map(|res| res.name().to_string()).collect();
        Some((snapshot.version().to_string(), names))
    }
}

#[tokio::test]
async fn applied_ignores_object_without_marker_label() -> Result<()> {
    let mut fixture = Fixture::new();
    let mut cm = bootstrap_config_map(&fixture.target, BODY_V1);
    cm.metadata.labels = None;
    fixture.api.insert(cm);
    let cm = fixture.api.get(&fixture.target).context("expected stored object")?;

    let task = fixture.tracker.applied(&cm);

    assert!(task.is_none(), "expected unlabelled object to be ignored, got {:?}", task);
    assert!(fixture.tracker.tracked() == 0, "expected no tracked objects, got {}", fixture.tracker.tracked());

    Ok(())
}

#[tokio::test]
async fn applied_skips_already_reconciled_version() -> Result<()> {
    let mut fixture = Fixture::new();
    let cm = fixture.store(BODY_V1)?;
    let task = fixture.tracker.applied(&cm).context("expected reconcile task")?;
    let retry = fixture.tracker.reconcile(task).await;
    assert!(retry.is_none(), "expected reconciliation to succeed, got retry {:?}", retry);

    let duplicate = fixture.tracker.applied(&cm);
    assert!(duplicate.is_none(), "expected duplicate apply to be skipped, got {:?}", duplicate);

    let cm = fixture.store(BODY_V2)?;
    let task = fixture.tracker.applied(&cm).context("expected reconcile task for new version")?;
    assert!(
        Some(&task.version) == cm.metadata.resource_version.as_ref(),
        "expected task for version {:?}, got {}",
        cm.metadata.resource_version,
        task.version
    );

    Ok(())
}

#[tokio::test]
async fn reconcile_drops_superseded_task() -> Result<()> {
    let mut fixture = Fixture::new();
    let stale = fixture.tracker.applied(&fixture.store(BODY_V1)?).context("expected reconcile task")?;
    let cm = fixture.store(BODY_V2)?;
    let current = fixture.tracker.applied(&cm).context("expected reconcile task")?;

    let retry = fixture.tracker.reconcile(stale).await;
    assert!(retry.is_none(), "expected stale task to be dropped, got retry {:?}", retry);
    assert!(fixture.published_clusters().is_none(), "expected stale task to publish nothing");

    fixture.tracker.reconcile(current.clone()).await;
    let published = fixture.published_clusters().context("expected snapshot for n1")?;
    let expected = (current.version, vec!["c2".to_string()]);
    assert!(published == expected, "expected {:?} got {:?}", expected, published);

    Ok(())
}

#[tokio::test]
async fn reconcile_drops_task_of_deleted_object() -> Result<()> {
    let mut fixture = Fixture::new();
    let cm = fixture.store(BODY_V1)?;
    let task = fixture.tracker.applied(&cm).context("expected reconcile task")?;

    fixture.tracker.deleted(&cm);
    let retry = fixture.tracker.reconcile(task).await;

    assert!(retry.is_none(), "expected task of deleted object to be dropped, got retry {:?}", retry);
    assert!(fixture.published_clusters().is_none(), "expected nothing published");
    assert!(fixture.tracker.tracked() == 0, "expected no tracked objects, got {}", fixture.tracker.tracked());

    Ok(())
}

#[tokio::test]
async fn reconcile_failure_retries_with_backoff_until_superseded() -> Result<()> {
    let mut fixture = Fixture::new();
    let task = fixture.tracker.applied(&fixture.store("not json")?).context("expected reconcile task")?;

    let (retry, delay) = fixture.tracker.reconcile(task.clone()).await.context("expected retry of failed task")?;
    assert!(retry.attempt == 1 && retry.version == task.version, "unexpected retry task {:?}", retry);
    assert!(delay == Duration::from_millis(500), "expected first retry after 500ms, got {:?}", delay);
    let (retry, delay) = fixture.tracker.reconcile(retry).await.context("expected retry of failed task")?;
    assert!(retry.attempt == 2, "unexpected retry task {:?}", retry);
    assert!(delay == Duration::from_secs(1), "expected second retry after 1s, got {:?}", delay);

    let fixed = fixture.tracker.applied(&fixture.store(BODY_V1)?).context("expected reconcile task")?;
    let res = fixture.tracker.reconcile(retry).await;
    assert!(res.is_none(), "expected superseded retry to be dropped, got {:?}", res);
    assert!(fixture.published_clusters().is_none(), "expected superseded retry to publish nothing");
    let res = fixture.tracker.reconcile(fixed).await;
    assert!(res.is_none(), "expected fixed object to reconcile, got retry {:?}", res);
    let published = fixture.published_clusters().context("expected snapshot for n1")?;
    assert!(published.1 == ["c1"], "expected cluster c1 to be published, got {:?}", published);

    Ok(())
}
