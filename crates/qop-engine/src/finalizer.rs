//! Deletion guard coordination.
//!
//! Every job gets the `quantum.io/finalizer` guard on first observation.
//! When a deletion timestamp appears, teardown of the job's children runs
//! before the guard is released; a teardown failure keeps the guard in
//! place so the store cannot finalize the delete early.

use std::sync::Arc;

use qop_api::QiskitJob;
use qop_store::ClusterStore;

use crate::error::EngineResult;
use crate::workload::WorkloadManager;

/// The deletion guard string.
pub const FINALIZER: &str = "quantum.io/finalizer";

/// Installs and releases the deletion guard.
pub struct FinalizerCoordinator {
    store: Arc<dyn ClusterStore>,
}

impl FinalizerCoordinator {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Install the guard if it is missing. Returns true when the job was
    /// updated (the caller should requeue and work from a fresh read).
    pub async fn ensure_guard(&self, job: &QiskitJob) -> EngineResult<bool> {
        if job.metadata.has_finalizer(FINALIZER) {
            return Ok(false);
        }
        let mut updated = job.clone();
        updated.metadata.add_finalizer(FINALIZER);
        self.store.update_job(&updated).await?;
        tracing::debug!(job = %job.key(), "deletion guard installed");
        Ok(true)
    }

    /// Tear down the job's children and release the guard.
    ///
    /// Idempotent: teardown tolerates already-absent children, and a job
    /// without the guard has nothing left to do. Any teardown error
    /// propagates before the guard is touched.
    pub async fn finalize(&self, job: &QiskitJob, workload: &WorkloadManager) -> EngineResult<()> {
        if !job.metadata.has_finalizer(FINALIZER) {
            return Ok(());
        }

        workload.teardown(job).await?;

        let mut updated = job.clone();
        updated.metadata.remove_finalizer(FINALIZER);
        self.store.update_job(&updated).await?;
        tracing::info!(job = %job.key(), "job finalized, guard released");
        Ok(())
    }
}
