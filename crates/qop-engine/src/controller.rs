//! The host event loop.
//!
//! Pumps watch events from the store into the work queue (child-resource
//! events wake their owning job) and runs a pool of workers that pull keys
//! and reconcile them to completion. The queue's per-key serialization
//! keeps any one job on a single worker at a time; ordering across keys is
//! not assumed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use qop_store::{ClusterStore, ResourceKind};

use crate::error::EngineResult;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

/// Long-running reconciliation host.
pub struct Controller {
    store: Arc<dyn ClusterStore>,
    reconciler: Arc<Reconciler>,
    queue: WorkQueue,
    shutdown: CancellationToken,
}

impl Controller {
    /// Create a controller around a store and an assembled reconciler.
    pub fn new(store: Arc<dyn ClusterStore>, reconciler: Reconciler) -> Self {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            queue: WorkQueue::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the controller when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested, then drain the work queue.
    pub async fn run(&self) -> EngineResult<()> {
        // Subscribe before listing so nothing created in between is lost:
        // events land in the subscription buffer until the pump starts.
        let mut watch = self.store.watch().await?;

        // Seed the queue with everything already persisted so a restarted
        // engine picks up in-flight jobs (crash recovery).
        for job in self.store.list_jobs(None).await? {
            self.queue.add(job.key()).await;
        }
        let pump = {
            let queue = self.queue.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = watch.next() => {
                            let Some(event) = event else { break };
                            match event.kind {
                                ResourceKind::Job => queue.add(event.key).await,
                                // Owner-reference-driven wake for children.
                                _ => {
                                    for owner in event.owners {
                                        queue.add(owner).await;
                                    }
                                }
                            }
                        }
                    }
                }
                tracing::debug!("watch pump exiting");
            })
        };

        let worker_count = self.reconciler.config().workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queue = self.queue.clone();
            let reconciler = self.reconciler.clone();
            workers.push(tokio::spawn(async move {
                let error_requeue = reconciler.config().error_requeue();
                while let Some(key) = queue.next().await {
                    match reconciler.reconcile(&key).await {
                        Ok(action) => {
                            queue.done(&key).await;
                            if action.requeue {
                                queue.add(key).await;
                            } else if let Some(delay) = action.after {
                                queue.add_after(key, delay);
                            }
                        }
                        // Transient failures never escalate; requeue late.
                        Err(e) => {
                            tracing::warn!(
                                worker = worker_id,
                                job = %key,
                                error = %e,
                                "reconcile error, requeueing"
                            );
                            queue.done(&key).await;
                            queue.add_after(key, error_requeue);
                        }
                    }
                }
                tracing::debug!(worker = worker_id, "worker exiting");
            }));
        }

        tracing::info!(workers = worker_count, "controller running");
        self.shutdown.cancelled().await;

        tracing::info!("shutdown requested, draining work queue");
        self.queue.shut_down().await;
        for worker in workers {
            let _ = worker.await;
        }
        pump.abort();
        let _ = pump.await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use qop_api::{
        BackendSpec, BackendType, CircuitSpec, ExecutionSpec, JobPhase, JobSpec, NamespacedName,
        OutputSpec, QiskitJob,
    };
    use qop_store::{MemoryStore, PodStatus};

    use crate::config::EngineConfig;
    use crate::error::EngineResult;
    use crate::selector::BackendSelector;
    use crate::validation::{CircuitValidator, ValidationRequest, ValidationResponse};

    struct AcceptAllValidator;

    #[async_trait]
    impl CircuitValidator for AcceptAllValidator {
        async fn validate(&self, _request: &ValidationRequest) -> EngineResult<ValidationResponse> {
            Ok(ValidationResponse {
                valid: true,
                circuit_hash: "hash".to_string(),
                depth: 2,
                qubits: 2,
                gates: 3,
                gate_types: BTreeMap::new(),
                estimated_execution_time: 0.01,
                errors: vec![],
                warnings: vec![],
            })
        }
    }

    /// End-to-end through the real event loop: watch events drive the job
    /// to Running, a pod success event drives it to Completed.
    #[tokio::test]
    async fn test_controller_drives_job_to_completion() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(AcceptAllValidator),
            BackendSelector::with_local_simulator(),
            EngineConfig::default(),
        );
        let controller = Controller::new(store.clone(), reconciler);
        let shutdown = controller.shutdown_token();

        let handle = tokio::spawn(async move { controller.run().await });

        let job = QiskitJob::new(
            "default",
            "bell",
            JobSpec {
                backend: BackendSpec::of_type(BackendType::LocalSimulator),
                circuit: CircuitSpec::inline("qc = QuantumCircuit(2, 2)"),
                execution: ExecutionSpec::default(),
                session: None,
                resources: None,
                budget: None,
                output: Some(OutputSpec::configmap("bell-state-results")),
                credentials: None,
                backend_selection: None,
            },
        );
        let key = job.key();
        store.create_job(job).await.unwrap();

        // Wait for the pod to appear, then let it succeed.
        let pod_key = NamespacedName::new("default", "qiskit-job-bell");
        let pod_appeared = async {
            loop {
                if store.get_pod(&pod_key).await.unwrap().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), pod_appeared)
            .await
            .expect("pod was never created");

        store
            .update_pod_status(
                &pod_key,
                PodStatus::succeeded(r#"{"results": {"counts": {"00": 512, "11": 512}}}"#),
            )
            .await
            .unwrap();

        let completed = async {
            loop {
                let job = store.get_job(&key).await.unwrap().unwrap();
                if job.status.phase == Some(JobPhase::Completed) {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let job = tokio::time::timeout(Duration::from_secs(5), completed)
            .await
            .expect("job never completed");

        assert_eq!(job.status.actual_cost.as_deref(), Some("$0.00"));
        assert!(job.status.completion_time.is_some());

        let results_key = NamespacedName::new("default", "bell-state-results");
        assert!(store
            .get_config_object(&results_key)
            .await
            .unwrap()
            .is_some());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
