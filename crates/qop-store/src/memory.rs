//! In-memory store with cluster write semantics.
//!
//! Backs the engine in tests and single-process deployments. Tables live
//! behind one `Arc<RwLock<..>>`; every mutation assigns a fresh resource
//! version from a store-wide counter and fans the change out to watchers.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use qop_api::{NamespacedName, ObjectMeta, QiskitJob, KIND};

use crate::config_object::ConfigObject;
use crate::error::{StoreError, StoreResult};
use crate::pod::{ExecutionPod, PodStatus};
use crate::store::{ClusterStore, EventType, ResourceKind, WatchEvent, WatchStream};

/// Watch channel depth per subscriber. A consumer that falls further behind
/// than this loses events and relies on level-triggered resync.
const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Tables {
    jobs: FxHashMap<NamespacedName, QiskitJob>,
    pods: FxHashMap<NamespacedName, ExecutionPod>,
    config_objects: FxHashMap<NamespacedName, ConfigObject>,
    next_version: u64,
    watchers: Vec<mpsc::Sender<WatchEvent>>,
}

impl Tables {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|sender| {
            match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Best-effort delivery; the subscriber resyncs.
                    tracing::warn!(key = %event.key, "watch subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Remove every pod and config object owned by the given uid,
    /// notifying watchers for each removal.
    fn cascade_delete(&mut self, namespace: &str, owner_uid: Uuid) {
        let pod_keys: Vec<_> = self
            .pods
            .values()
            .filter(|p| p.metadata.namespace == namespace && p.metadata.owned_by(owner_uid))
            .map(|p| p.key())
            .collect();
        for key in pod_keys {
            if let Some(pod) = self.pods.remove(&key) {
                let owners = job_owners(&pod.metadata);
                self.notify(WatchEvent {
                    kind: ResourceKind::Pod,
                    event_type: EventType::Deleted,
                    key,
                    owners,
                });
            }
        }

        let object_keys: Vec<_> = self
            .config_objects
            .values()
            .filter(|o| o.metadata.namespace == namespace && o.metadata.owned_by(owner_uid))
            .map(|o| o.key())
            .collect();
        for key in object_keys {
            if let Some(object) = self.config_objects.remove(&key) {
                let owners = job_owners(&object.metadata);
                self.notify(WatchEvent {
                    kind: ResourceKind::ConfigObject,
                    event_type: EventType::Deleted,
                    key,
                    owners,
                });
            }
        }
    }
}

/// Keys of the jobs referenced by a child resource's owner list.
fn job_owners(meta: &ObjectMeta) -> Vec<NamespacedName> {
    meta.owner_references
        .iter()
        .filter(|r| r.kind == KIND)
        .map(|r| NamespacedName::new(meta.namespace.clone(), r.name.clone()))
        .collect()
}

/// Thread-safe in-memory cluster store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn create_job(&self, mut job: QiskitJob) -> StoreResult<QiskitJob> {
        let key = job.key();
        let mut tables = self.inner.write().await;
        if tables.jobs.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "job",
                key: key.to_string(),
            });
        }
        job.metadata.resource_version = tables.bump();
        tables.jobs.insert(key.clone(), job.clone());
        tables.notify(WatchEvent {
            kind: ResourceKind::Job,
            event_type: EventType::Added,
            key,
            owners: Vec::new(),
        });
        Ok(job)
    }

    async fn get_job(&self, key: &NamespacedName) -> StoreResult<Option<QiskitJob>> {
        let tables = self.inner.read().await;
        Ok(tables.jobs.get(key).cloned())
    }

    async fn update_job(&self, job: &QiskitJob) -> StoreResult<QiskitJob> {
        let key = job.key();
        let mut tables = self.inner.write().await;
        let stored = tables.jobs.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: "job",
            key: key.to_string(),
        })?;

        if stored.metadata.resource_version != job.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "job",
                key: key.to_string(),
                expected: job.metadata.resource_version,
                found: stored.metadata.resource_version,
            });
        }

        let mut updated = job.clone();
        // Identity and store-managed fields are not writable here.
        updated.metadata.uid = stored.metadata.uid;
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        updated.status = stored.status.clone();

        // An update that empties the finalizer list of a deleting object
        // finalizes the delete.
        if updated.metadata.is_deleting() && updated.metadata.finalizers.is_empty() {
            let uid = updated.metadata.uid;
            let namespace = updated.metadata.namespace.clone();
            tables.jobs.remove(&key);
            tables.cascade_delete(&namespace, uid);
            tables.notify(WatchEvent {
                kind: ResourceKind::Job,
                event_type: EventType::Deleted,
                key,
                owners: Vec::new(),
            });
            return Ok(updated);
        }

        updated.metadata.resource_version = tables.bump();
        tables.jobs.insert(key.clone(), updated.clone());
        tables.notify(WatchEvent {
            kind: ResourceKind::Job,
            event_type: EventType::Modified,
            key,
            owners: Vec::new(),
        });
        Ok(updated)
    }

    async fn update_job_status(&self, job: &QiskitJob) -> StoreResult<QiskitJob> {
        let key = job.key();
        let mut tables = self.inner.write().await;
        let stored = tables.jobs.get(&key).ok_or_else(|| StoreError::NotFound {
            kind: "job",
            key: key.to_string(),
        })?;

        if stored.metadata.resource_version != job.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "job",
                key: key.to_string(),
                expected: job.metadata.resource_version,
                found: stored.metadata.resource_version,
            });
        }

        // Status subresource: everything except status comes from the
        // stored object, so the spec cannot be mutated through this path.
        let mut updated = stored.clone();
        updated.status = job.status.clone();
        updated.metadata.resource_version = tables.bump();
        tables.jobs.insert(key.clone(), updated.clone());
        tables.notify(WatchEvent {
            kind: ResourceKind::Job,
            event_type: EventType::Modified,
            key,
            owners: Vec::new(),
        });
        Ok(updated)
    }

    async fn delete_job(&self, key: &NamespacedName) -> StoreResult<bool> {
        let mut tables = self.inner.write().await;
        let (finalized, needs_mark) = match tables.jobs.get(key) {
            None => return Ok(false),
            Some(stored) => (
                stored.metadata.finalizers.is_empty(),
                stored.metadata.deletion_timestamp.is_none(),
            ),
        };

        // No guard: the delete finalizes immediately and cascades.
        if finalized {
            if let Some(removed) = tables.jobs.remove(key) {
                let uid = removed.metadata.uid;
                let namespace = removed.metadata.namespace.clone();
                tables.cascade_delete(&namespace, uid);
                tables.notify(WatchEvent {
                    kind: ResourceKind::Job,
                    event_type: EventType::Deleted,
                    key: key.clone(),
                    owners: Vec::new(),
                });
            }
            return Ok(true);
        }

        // Guarded: mark the deletion timestamp and wait for the finalizer
        // to be released.
        if needs_mark {
            let version = tables.bump();
            if let Some(stored) = tables.jobs.get_mut(key) {
                stored.metadata.deletion_timestamp = Some(chrono::Utc::now());
                stored.metadata.resource_version = version;
            }
            tables.notify(WatchEvent {
                kind: ResourceKind::Job,
                event_type: EventType::Modified,
                key: key.clone(),
                owners: Vec::new(),
            });
        }
        Ok(true)
    }

    async fn list_jobs(&self, namespace: Option<&str>) -> StoreResult<Vec<QiskitJob>> {
        let tables = self.inner.read().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| namespace.map_or(true, |ns| j.metadata.namespace == ns))
            .cloned()
            .collect())
    }

    async fn create_pod(&self, mut pod: ExecutionPod) -> StoreResult<ExecutionPod> {
        let key = pod.key();
        let mut tables = self.inner.write().await;
        if tables.pods.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "pod",
                key: key.to_string(),
            });
        }
        pod.metadata.resource_version = tables.bump();
        let owners = job_owners(&pod.metadata);
        tables.pods.insert(key.clone(), pod.clone());
        tables.notify(WatchEvent {
            kind: ResourceKind::Pod,
            event_type: EventType::Added,
            key,
            owners,
        });
        Ok(pod)
    }

    async fn get_pod(&self, key: &NamespacedName) -> StoreResult<Option<ExecutionPod>> {
        let tables = self.inner.read().await;
        Ok(tables.pods.get(key).cloned())
    }

    async fn update_pod_status(&self, key: &NamespacedName, status: PodStatus) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let version = tables.bump();
        let pod = tables.pods.get_mut(key).ok_or_else(|| StoreError::NotFound {
            kind: "pod",
            key: key.to_string(),
        })?;
        pod.status = status;
        pod.metadata.resource_version = version;
        let owners = job_owners(&pod.metadata);
        tables.notify(WatchEvent {
            kind: ResourceKind::Pod,
            event_type: EventType::Modified,
            key: key.clone(),
            owners,
        });
        Ok(())
    }

    async fn delete_pod(&self, key: &NamespacedName) -> StoreResult<bool> {
        let mut tables = self.inner.write().await;
        match tables.pods.remove(key) {
            Some(pod) => {
                let owners = job_owners(&pod.metadata);
                tables.notify(WatchEvent {
                    kind: ResourceKind::Pod,
                    event_type: EventType::Deleted,
                    key: key.clone(),
                    owners,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_pods_owned_by(
        &self,
        namespace: &str,
        owner_uid: Uuid,
    ) -> StoreResult<Vec<ExecutionPod>> {
        let tables = self.inner.read().await;
        Ok(tables
            .pods
            .values()
            .filter(|p| p.metadata.namespace == namespace && p.metadata.owned_by(owner_uid))
            .cloned()
            .collect())
    }

    async fn create_config_object(&self, mut object: ConfigObject) -> StoreResult<ConfigObject> {
        let key = object.key();
        let mut tables = self.inner.write().await;
        if tables.config_objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "config object",
                key: key.to_string(),
            });
        }
        object.metadata.resource_version = tables.bump();
        let owners = job_owners(&object.metadata);
        tables.config_objects.insert(key.clone(), object.clone());
        tables.notify(WatchEvent {
            kind: ResourceKind::ConfigObject,
            event_type: EventType::Added,
            key,
            owners,
        });
        Ok(object)
    }

    async fn get_config_object(&self, key: &NamespacedName) -> StoreResult<Option<ConfigObject>> {
        let tables = self.inner.read().await;
        Ok(tables.config_objects.get(key).cloned())
    }

    async fn update_config_object(&self, object: &ConfigObject) -> StoreResult<ConfigObject> {
        let key = object.key();
        let mut tables = self.inner.write().await;
        let stored = tables
            .config_objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "config object",
                key: key.to_string(),
            })?;

        if stored.metadata.resource_version != object.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "config object",
                key: key.to_string(),
                expected: object.metadata.resource_version,
                found: stored.metadata.resource_version,
            });
        }

        let mut updated = object.clone();
        updated.metadata.uid = stored.metadata.uid;
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        updated.metadata.resource_version = tables.bump();
        let owners = job_owners(&updated.metadata);
        tables.config_objects.insert(key.clone(), updated.clone());
        tables.notify(WatchEvent {
            kind: ResourceKind::ConfigObject,
            event_type: EventType::Modified,
            key,
            owners,
        });
        Ok(updated)
    }

    async fn delete_config_object(&self, key: &NamespacedName) -> StoreResult<bool> {
        let mut tables = self.inner.write().await;
        match tables.config_objects.remove(key) {
            Some(object) => {
                let owners = job_owners(&object.metadata);
                tables.notify(WatchEvent {
                    kind: ResourceKind::ConfigObject,
                    event_type: EventType::Deleted,
                    key: key.clone(),
                    owners,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_config_objects_owned_by(
        &self,
        namespace: &str,
        owner_uid: Uuid,
    ) -> StoreResult<Vec<ConfigObject>> {
        let tables = self.inner.read().await;
        Ok(tables
            .config_objects
            .values()
            .filter(|o| o.metadata.namespace == namespace && o.metadata.owned_by(owner_uid))
            .cloned()
            .collect())
    }

    async fn watch(&self) -> StoreResult<WatchStream> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut tables = self.inner.write().await;
        tables.watchers.push(tx);
        Ok(WatchStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qop_api::{
        BackendSpec, BackendType, CircuitSpec, ExecutionSpec, JobPhase, JobSpec, ObjectMeta,
    };
    use crate::pod::{Container, PodPhase, PodResources, PodSpec, SecurityContext};

    fn sample_job(name: &str) -> QiskitJob {
        QiskitJob::new(
            "default",
            name,
            JobSpec {
                backend: BackendSpec::of_type(BackendType::LocalSimulator),
                circuit: CircuitSpec::inline("qc = QuantumCircuit(2, 2)"),
                execution: ExecutionSpec::default(),
                session: None,
                resources: None,
                budget: None,
                output: None,
                credentials: None,
                backend_selection: None,
            },
        )
    }

    fn sample_pod(name: &str, owner: &QiskitJob) -> ExecutionPod {
        ExecutionPod {
            metadata: ObjectMeta::new("default", name).with_owner(owner.controller_owner_ref()),
            spec: PodSpec {
                containers: vec![Container {
                    name: "executor".to_string(),
                    image: "python:3.11-slim".to_string(),
                    command: vec![],
                    env: vec![],
                    resources: PodResources::executor_defaults(),
                    security_context: SecurityContext::restricted(),
                    volume_mounts: vec![],
                }],
                restart_policy: Default::default(),
                volumes: vec![],
            },
            status: PodStatus::default(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = MemoryStore::new();
        let created = store.create_job(sample_job("bell")).await.unwrap();
        assert!(created.metadata.resource_version > 0);

        let fetched = store.get_job(&created.key()).await.unwrap().unwrap();
        assert_eq!(fetched, created);

        let err = store.create_job(sample_job("bell")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_status_update_is_compare_and_swap() {
        let store = MemoryStore::new();
        let created = store.create_job(sample_job("bell")).await.unwrap();

        let mut first = created.clone();
        first.status.phase = Some(JobPhase::Pending);
        let updated = store.update_job_status(&first).await.unwrap();
        assert!(updated.metadata.resource_version > created.metadata.resource_version);

        // A write based on the stale version loses the race.
        let mut stale = created;
        stale.status.phase = Some(JobPhase::Failed);
        let err = store.update_job_status(&stale).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_status_subresource_cannot_mutate_spec() {
        let store = MemoryStore::new();
        let created = store.create_job(sample_job("bell")).await.unwrap();

        let mut tampered = created.clone();
        tampered.spec.circuit.code = Some("malicious()".to_string());
        tampered.status.phase = Some(JobPhase::Pending);
        store.update_job_status(&tampered).await.unwrap();

        let stored = store.get_job(&created.key()).await.unwrap().unwrap();
        assert_eq!(stored.spec, created.spec);
        assert_eq!(stored.status.phase, Some(JobPhase::Pending));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizers_and_cascades() {
        let store = MemoryStore::new();
        let mut job = store.create_job(sample_job("bell")).await.unwrap();
        job.metadata.add_finalizer("quantum.io/finalizer");
        let job = store.update_job(&job).await.unwrap();

        let pod = store
            .create_pod(sample_pod("qiskit-job-bell", &job))
            .await
            .unwrap();

        // Delete only marks the timestamp while the finalizer is present.
        assert!(store.delete_job(&job.key()).await.unwrap());
        let deleting = store.get_job(&job.key()).await.unwrap().unwrap();
        assert!(deleting.metadata.is_deleting());
        assert!(store.get_pod(&pod.key()).await.unwrap().is_some());

        // Removing the finalizer finalizes the delete and cascades.
        let mut released = deleting;
        released.metadata.remove_finalizer("quantum.io/finalizer");
        store.update_job(&released).await.unwrap();

        assert!(store.get_job(&released.key()).await.unwrap().is_none());
        assert!(store.get_pod(&pod.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pods_owned_by() {
        let store = MemoryStore::new();
        let job_a = store.create_job(sample_job("a")).await.unwrap();
        let job_b = store.create_job(sample_job("b")).await.unwrap();

        store
            .create_pod(sample_pod("qiskit-job-a", &job_a))
            .await
            .unwrap();
        store
            .create_pod(sample_pod("qiskit-job-b", &job_b))
            .await
            .unwrap();

        let owned = store
            .list_pods_owned_by("default", job_a.metadata.uid)
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].metadata.name, "qiskit-job-a");
    }

    #[tokio::test]
    async fn test_watch_delivers_owner_mapped_pod_events() {
        let store = MemoryStore::new();
        let job = store.create_job(sample_job("bell")).await.unwrap();
        let mut stream = store.watch().await.unwrap();

        let pod = store
            .create_pod(sample_pod("qiskit-job-bell", &job))
            .await
            .unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.kind, ResourceKind::Pod);
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.owners, vec![job.key()]);

        store
            .update_pod_status(&pod.key(), PodStatus::succeeded("{}"))
            .await
            .unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventType::Modified);

        let stored = store.get_pod(&pod.key()).await.unwrap().unwrap();
        assert_eq!(stored.status.phase, PodPhase::Succeeded);
    }
}
