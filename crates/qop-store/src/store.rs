//! The record store contract consumed by the engine.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use qop_api::{NamespacedName, QiskitJob};

use crate::config_object::ConfigObject;
use crate::error::StoreResult;
use crate::pod::{ExecutionPod, PodStatus};

/// Resource kinds surfaced on the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Job,
    Pod,
    ConfigObject,
}

/// How a watched resource changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A change notification from the store.
///
/// `owners` carries the `(namespace, name)` keys of the owning jobs so that
/// child-resource events can wake the right reconcile without a reverse
/// lookup.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub event_type: EventType,
    pub key: NamespacedName,
    pub owners: Vec<NamespacedName>,
}

/// A live watch subscription.
///
/// Delivery is best-effort: a slow consumer may miss events, which the
/// engine tolerates through level-triggered reconciliation and defensive
/// polling.
pub struct WatchStream {
    receiver: mpsc::Receiver<WatchEvent>,
}

impl WatchStream {
    pub(crate) fn new(receiver: mpsc::Receiver<WatchEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event. Returns `None` once the store shuts down.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }
}

/// The authoritative declarative registry the engine reconciles against.
///
/// Write semantics:
/// - `update_job` and `update_job_status` are compare-and-swap on
///   `metadata.resource_version`; a lost race returns
///   [`crate::StoreError::Conflict`].
/// - `update_job_status` writes the status subresource only; the stored
///   spec is never touched, regardless of what the caller passes.
/// - `delete_job` marks the deletion timestamp while finalizers remain;
///   the object is physically removed (cascading to owned children) once
///   its finalizer list empties.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    // ── Jobs ────────────────────────────────────────────────────────

    async fn create_job(&self, job: QiskitJob) -> StoreResult<QiskitJob>;

    async fn get_job(&self, key: &NamespacedName) -> StoreResult<Option<QiskitJob>>;

    /// Update job metadata (finalizers). Compare-and-swap.
    async fn update_job(&self, job: &QiskitJob) -> StoreResult<QiskitJob>;

    /// Update the job status subresource. Compare-and-swap.
    async fn update_job_status(&self, job: &QiskitJob) -> StoreResult<QiskitJob>;

    /// Request deletion. Returns true when the job existed.
    async fn delete_job(&self, key: &NamespacedName) -> StoreResult<bool>;

    async fn list_jobs(&self, namespace: Option<&str>) -> StoreResult<Vec<QiskitJob>>;

    // ── Execution pods ──────────────────────────────────────────────

    async fn create_pod(&self, pod: ExecutionPod) -> StoreResult<ExecutionPod>;

    async fn get_pod(&self, key: &NamespacedName) -> StoreResult<Option<ExecutionPod>>;

    /// Record an observed pod status (the scheduling substrate's side of
    /// the contract; tests drive pod phases through this).
    async fn update_pod_status(&self, key: &NamespacedName, status: PodStatus) -> StoreResult<()>;

    /// Delete a pod. Returns true when it existed.
    async fn delete_pod(&self, key: &NamespacedName) -> StoreResult<bool>;

    async fn list_pods_owned_by(
        &self,
        namespace: &str,
        owner_uid: Uuid,
    ) -> StoreResult<Vec<ExecutionPod>>;

    // ── Config objects ──────────────────────────────────────────────

    async fn create_config_object(&self, object: ConfigObject) -> StoreResult<ConfigObject>;

    async fn get_config_object(&self, key: &NamespacedName) -> StoreResult<Option<ConfigObject>>;

    /// Replace the data of an existing config object.
    async fn update_config_object(&self, object: &ConfigObject) -> StoreResult<ConfigObject>;

    /// Delete a config object. Returns true when it existed.
    async fn delete_config_object(&self, key: &NamespacedName) -> StoreResult<bool>;

    async fn list_config_objects_owned_by(
        &self,
        namespace: &str,
        owner_uid: Uuid,
    ) -> StoreResult<Vec<ConfigObject>>;

    // ── Watches ─────────────────────────────────────────────────────

    /// Subscribe to change notifications for every kind.
    async fn watch(&self) -> StoreResult<WatchStream>;
}
