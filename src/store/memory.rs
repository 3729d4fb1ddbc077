//! In-memory [`ObjectStore`] with the optimistic-concurrency behaviour of the API server.
//!
//! Used by the test-suite to drive reconcilers without a cluster. Objects get a uid,
//! `resourceVersion` and `creationTimestamp` on create, status writes are rejected when the
//! caller's `resourceVersion` is stale, and individual deletes can be made to fail.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::{
    api::{batch::v1::Job, core::v1::Pod},
    apimachinery::pkg::apis::meta::v1::Time,
};
use kube::{Resource, ResourceExt as _};
use prometheus::Registry;
use serde::{de::DeserializeOwned, Serialize};
use snafu::ResultExt as _;

use super::{Created, ObjectStore};
use crate::{
    config::AppConfig,
    crd::{Backup, BackupPolicy, Restore},
    events::RecordingEventPublisher,
    metrics::Metrics,
    ConflictSnafu, Context, MetricsSnafu, NotFoundSnafu, Result, SerializationSnafu,
};

type Key = (String, String);

pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<Key, K>>,
    failing_deletes: Mutex<BTreeSet<String>>,
    next_version: AtomicU64,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            failing_deletes: Mutex::new(BTreeSet::new()),
            next_version: AtomicU64::new(1),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<Key, K>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_version(&self, obj: &mut K) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        obj.meta_mut().resource_version = Some(version.to_string());
    }

    fn stamp(&self, obj: &mut K) {
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", self.next_version.load(Ordering::SeqCst)));
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Time(Utc::now()));
        }
        self.bump_version(obj);
    }

    /// Seed an object as if it had been created earlier, keeping any metadata already set
    /// (`creationTimestamp` in particular).
    pub fn insert(&self, mut obj: K) -> K {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        obj.meta_mut().namespace = Some(namespace.clone());
        self.stamp(&mut obj);
        self.objects().insert((namespace, obj.name_any()), obj.clone());
        obj
    }

    pub fn find(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects().get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn all(&self) -> Vec<K> {
        self.objects().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Change a stored object out of band, as another actor in the cluster would.
    pub fn modify(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) -> Option<K> {
        let mut objects = self.objects();
        let obj = objects.get_mut(&(namespace.to_string(), name.to_string()))?;
        f(obj);
        self.bump_version(obj);
        Some(obj.clone())
    }

    /// Make every later delete of `name` fail.
    pub fn fail_delete(&self, name: &str) {
        self.failing_deletes.lock().unwrap_or_else(PoisonError::into_inner).insert(name.to_string());
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.find(namespace, name))
    }

    async fn list(&self, namespace: &str, labels: Option<&str>) -> Result<Vec<K>> {
        Ok(self
            .objects()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, obj)| labels.map_or(true, |selector| selector_matches(selector, *obj)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<Created<K>> {
        let key = (namespace.to_string(), obj.name_any());
        if self.objects().contains_key(&key) {
            return Ok(Created::AlreadyExists);
        }

        let mut obj = obj.clone();
        obj.meta_mut().namespace = Some(namespace.to_string());
        obj.meta_mut().uid = None;
        obj.meta_mut().creation_timestamp = None;
        self.stamp(&mut obj);
        self.objects().insert(key, obj.clone());
        Ok(Created::New(obj))
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        let mut objects = self.objects();
        let Some(stored) = objects.get_mut(&(namespace.clone(), name.clone())) else {
            return NotFoundSnafu { kind, namespace, name }.fail();
        };

        if stored.resource_version() != obj.resource_version() {
            return ConflictSnafu { kind, namespace, name }.fail();
        }

        let mut merged = serde_json::to_value(&*stored).context(SerializationSnafu)?;
        let incoming = serde_json::to_value(obj).context(SerializationSnafu)?;
        merged["status"] = incoming.get("status").cloned().unwrap_or_default();

        let mut updated: K = serde_json::from_value(merged).context(SerializationSnafu)?;
        self.bump_version(&mut updated);
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap_or_else(PoisonError::into_inner).contains(name) {
            snafu::whatever!("Injected delete failure for {} {namespace}/{name}", K::kind(&()));
        }

        self.objects().remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// Equality-based label selector, `key=value[,key=value...]`.
fn selector_matches(selector: &str, obj: &impl Resource) -> bool {
    let labels = obj.meta().labels.as_ref();
    selector.split(',').map(str::trim).filter(|x| !x.is_empty()).all(|requirement| {
        let Some((key, value)) =
            requirement.split_once("==").or_else(|| requirement.split_once('='))
        else {
            return false;
        };
        labels.and_then(|x| x.get(key.trim())).is_some_and(|x| x == value.trim())
    })
}

/// One in-memory store per resource kind the reconcilers touch, plus the events they emit.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    pub policies: Arc<MemoryStore<BackupPolicy>>,
    pub backups: Arc<MemoryStore<Backup>>,
    pub restores: Arc<MemoryStore<Restore>>,
    pub jobs: Arc<MemoryStore<Job>>,
    pub pods: Arc<MemoryStore<Pod>>,
    pub events: Arc<RecordingEventPublisher>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self, config: AppConfig) -> Result<Context> {
        let metrics = Metrics::new(&Registry::new()).context(MetricsSnafu)?;
        Ok(Context::new(
            self.policies.clone(),
            self.backups.clone(),
            self.restores.clone(),
            self.jobs.clone(),
            self.pods.clone(),
            self.events.clone(),
            metrics,
            config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupSpec, BackupStatus, BackupTarget, Phase};
    use maplit::btreemap;

    fn backup(name: &str) -> Backup {
        let mut backup = Backup::new(
            name,
            BackupSpec {
                policy_ref: "nightly".into(),
                target: BackupTarget { pvc_name: "data".into(), namespace: None },
            },
        );
        backup.metadata.namespace = Some("apps".into());
        backup
    }

    #[tokio::test]
    async fn create_reports_existing_names() {
        let store = MemoryStore::<Backup>::new();

        let created = store.create("apps", &backup("nightly-1")).await.unwrap();
        let Created::New(created) = created else { panic!("expected a new object") };
        assert!(created.uid().is_some());
        assert!(created.creation_timestamp().is_some());

        assert_eq!(store.create("apps", &backup("nightly-1")).await.unwrap(), Created::AlreadyExists);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stale_status_writes_conflict() {
        let store = MemoryStore::<Backup>::new();
        let stored = store.insert(backup("nightly-1"));

        let mut first = stored.clone();
        first.status = Some(BackupStatus { phase: Some(Phase::Running), ..Default::default() });
        let written = store.replace_status(&first).await.unwrap();
        assert_eq!(written.phase(), Phase::Running);

        let mut stale = stored;
        stale.status = Some(BackupStatus { phase: Some(Phase::Failed), ..Default::default() });
        let err = store.replace_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.find("apps", "nightly-1").unwrap().phase(), Phase::Running);
    }

    #[tokio::test]
    async fn status_writes_leave_spec_untouched() {
        let store = MemoryStore::<Backup>::new();
        let stored = store.insert(backup("nightly-1"));

        let mut update = stored.clone();
        update.spec.policy_ref = "changed".into();
        update.status = Some(BackupStatus { phase: Some(Phase::Running), ..Default::default() });
        let written = store.replace_status(&update).await.unwrap();

        assert_eq!(written.spec.policy_ref, "nightly");
        assert_eq!(written.phase(), Phase::Running);
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryStore::<Backup>::new();
        let mut labeled = backup("labeled");
        labeled.metadata.labels = Some(btreemap! { "job-name".to_string() => "x-job".to_string() });
        store.insert(labeled);
        store.insert(backup("plain"));
        let mut elsewhere = backup("elsewhere");
        elsewhere.metadata.namespace = Some("other".into());
        store.insert(elsewhere);

        assert_eq!(store.list("apps", None).await.unwrap().len(), 2);
        let matched = store.list("apps", Some("job-name=x-job")).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name_any(), "labeled");
        assert!(store.list("apps", Some("job-name=other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deletes_can_fail_on_demand() {
        let store = MemoryStore::<Backup>::new();
        store.insert(backup("keep"));
        store.insert(backup("drop"));
        store.fail_delete("keep");

        assert!(store.delete("apps", "keep").await.is_err());
        store.delete("apps", "drop").await.unwrap();
        store.delete("apps", "never-existed").await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
