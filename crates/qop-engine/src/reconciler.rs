//! The phase engine.
//!
//! A single [`Reconciler::reconcile`] pass reads one job by key, converges
//! observed state toward the contract of its current phase, and returns a
//! requeue hint. Passes are idempotent: repeated invocations on an
//! unchanged world write nothing and produce the same hint.
//!
//! Failure handling follows the error taxonomy: structural, validation, and
//! unsupported-capability errors fail the job permanently; execution
//! failures fail it with retry; transient infrastructure errors propagate
//! to the host loop, which requeues with a delay and never marks the job
//! Failed for them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use qop_api::{Condition, ConditionStatus, JobPhase, NamespacedName, QiskitJob};
use qop_store::{ClusterStore, ExecutionPod, PodPhase};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::finalizer::FinalizerCoordinator;
use crate::persister::ResultPersister;
use crate::selector::BackendSelector;
use crate::validation::{CircuitValidator, ValidationRequest};
use crate::workload::{EnsureOutcome, WorkloadManager};

/// Condition recorded when the circuit passes validation.
pub const CONDITION_VALIDATED: &str = "Validated";

/// Condition recorded when a backend is selected.
pub const CONDITION_SCHEDULED: &str = "Scheduled";

/// Condition recorded when the job completes.
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Condition distinguishing retryable failures from permanent ones.
pub const CONDITION_RETRYABLE: &str = "Retryable";

/// Requeue hint returned to the host event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileAction {
    /// Re-deliver the key immediately.
    pub requeue: bool,
    /// Re-deliver the key after a delay.
    pub after: Option<Duration>,
}

impl ReconcileAction {
    /// No re-delivery needed; the next wake-up is event-driven.
    pub fn done() -> Self {
        Self::default()
    }

    /// Re-deliver immediately (used after phase transitions).
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            after: None,
        }
    }

    /// Re-deliver after the given delay.
    pub fn after(delay: Duration) -> Self {
        Self {
            requeue: false,
            after: Some(delay),
        }
    }
}

/// Drives one job at a time through its lifecycle.
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    validator: Arc<dyn CircuitValidator>,
    selector: BackendSelector,
    workload: WorkloadManager,
    persister: ResultPersister,
    finalizer: FinalizerCoordinator,
    config: EngineConfig,
}

impl Reconciler {
    /// Assemble the engine around a store, a validator, and a selector.
    pub fn new(
        store: Arc<dyn ClusterStore>,
        validator: Arc<dyn CircuitValidator>,
        selector: BackendSelector,
        config: EngineConfig,
    ) -> Self {
        let workload = WorkloadManager::new(store.clone(), config.executor_image.clone());
        let persister = ResultPersister::new(store.clone());
        let finalizer = FinalizerCoordinator::new(store.clone());
        Self {
            store,
            validator,
            selector,
            workload,
            persister,
            finalizer,
            config,
        }
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one reconcile pass for the job identified by `key`.
    pub async fn reconcile(&self, key: &NamespacedName) -> EngineResult<ReconcileAction> {
        let Some(job) = self.store.get_job(key).await? else {
            tracing::debug!(job = %key, "job not found, likely deleted");
            return Ok(ReconcileAction::done());
        };

        // Deletion wins over all phase logic.
        if job.metadata.is_deleting() {
            self.finalizer.finalize(&job, &self.workload).await?;
            return Ok(ReconcileAction::done());
        }

        // Install the deletion guard before anything else can happen to
        // the job. The write bumps the version, so work from a fresh read.
        if self.finalizer.ensure_guard(&job).await? {
            return Ok(ReconcileAction::requeue());
        }

        let Some(phase) = job.status.phase else {
            return self.initialize(job).await;
        };

        tracing::debug!(job = %key, phase = %phase, "reconciling");

        match phase {
            JobPhase::Pending => self.handle_pending(job).await,
            JobPhase::Validating => self.handle_validating(job).await,
            JobPhase::Scheduling => self.handle_scheduling(job).await,
            JobPhase::Running => self.handle_running(job).await,
            JobPhase::Failed => self.handle_failed(job).await,
            JobPhase::Retrying => self.handle_retrying(job).await,
            JobPhase::Completed | JobPhase::Cancelled => Ok(ReconcileAction::done()),
            JobPhase::Unknown => {
                tracing::warn!(job = %key, "unknown phase, resetting to Pending");
                self.update_phase(job, JobPhase::Pending, "unknown phase reset to Pending")
                    .await
            }
        }
    }

    /// First observation: stamp the start time and enter Pending.
    async fn initialize(&self, mut job: QiskitJob) -> EngineResult<ReconcileAction> {
        job.status.phase = Some(JobPhase::Pending);
        job.status.message = Some("job created, awaiting validation".to_string());
        job.status.start_time = Some(Utc::now());
        self.store.update_job_status(&job).await?;
        tracing::info!(job = %job.key(), "job initialized");
        Ok(ReconcileAction::requeue())
    }

    /// Pending: structural spec validation.
    async fn handle_pending(&self, job: QiskitJob) -> EngineResult<ReconcileAction> {
        if let Err(message) = job.spec.validate() {
            return self.fail_permanently(job, message).await;
        }
        self.update_phase(
            job,
            JobPhase::Validating,
            "job specification validated, starting circuit validation",
        )
        .await
    }

    /// Validating: run the circuit through the validation service.
    async fn handle_validating(&self, mut job: QiskitJob) -> EngineResult<ReconcileAction> {
        let code = match self.workload.resolve_circuit_code(&job).await {
            Ok(code) => code,
            Err(e) if e.is_permanent() => return self.fail_permanently(job, e.to_string()).await,
            Err(e) => return Err(e),
        };

        let request = ValidationRequest {
            code,
            backend_name: job.spec.backend.name.clone(),
            optimization_level: job.spec.execution.effective_optimization_level(),
        };

        let response = match self.validator.validate(&request).await {
            Ok(response) => response,
            Err(e) if e.is_permanent() => return self.fail_permanently(job, e.to_string()).await,
            // Unreachable analyzer is transient; requeue rather than fail.
            Err(e) => return Err(e),
        };

        if !response.valid {
            let message = format!("circuit validation failed: {}", response.joined_errors());
            return self.fail_permanently(job, message).await;
        }

        for warning in &response.warnings {
            tracing::debug!(job = %job.key(), warning = %warning, "validation warning");
        }

        job.status.circuit_metadata = Some(response.circuit_metadata());
        job.status.set_condition(Condition::new(
            CONDITION_VALIDATED,
            ConditionStatus::True,
            "CircuitValidated",
            "circuit validated by the validation service",
        ));
        self.update_phase(job, JobPhase::Scheduling, "circuit validated successfully")
            .await
    }

    /// Scheduling: pick a concrete backend and estimate cost.
    async fn handle_scheduling(&self, mut job: QiskitJob) -> EngineResult<ReconcileAction> {
        let selection = match self.selector.select(&job).await {
            Ok(selection) => selection,
            Err(e) if e.is_permanent() => return self.fail_permanently(job, e.to_string()).await,
            Err(e) => return Err(e),
        };

        let message = format!("selected backend {}", selection.backend);
        job.status.selected_backend = Some(selection.backend);
        job.status.estimated_cost = Some(selection.estimated_cost);
        job.status.original_backend = selection.original_backend;
        job.status.fallback_used = selection.fallback_used;
        job.status.set_condition(Condition::new(
            CONDITION_SCHEDULED,
            ConditionStatus::True,
            "BackendSelected",
            message,
        ));
        self.update_phase(
            job,
            JobPhase::Running,
            "backend selected, creating execution workload",
        )
        .await
    }

    /// Running: converge on exactly one execution workload and track it.
    async fn handle_running(&self, mut job: QiskitJob) -> EngineResult<ReconcileAction> {
        let outcome = match self.workload.ensure(&job).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_permanent() => return self.fail_permanently(job, e.to_string()).await,
            Err(e) => return Err(e),
        };

        match outcome {
            EnsureOutcome::Created(pod) => {
                job.status.job_id = Some(pod.metadata.name.clone());
                job.status.message = Some("execution workload created".to_string());
                self.store.update_job_status(&job).await?;
                Ok(ReconcileAction::after(self.config.running_poll()))
            }
            EnsureOutcome::Existing(pod) => match pod.status.phase {
                PodPhase::Pending => self.note_progress(job, "execution workload pending").await,
                PodPhase::Running => {
                    self.note_progress(job, "quantum circuit is executing").await
                }
                PodPhase::Succeeded => self.complete(job, pod).await,
                PodPhase::Failed => {
                    let detail = pod.status.message.clone().unwrap_or_else(|| {
                        format!("exit code {}", pod.status.exit_code.unwrap_or(-1))
                    });
                    self.fail_retryable(job, format!("execution workload failed: {detail}"))
                        .await
                }
                PodPhase::Unknown => {
                    self.note_progress(job, "execution workload in unknown state")
                        .await
                }
            },
        }
    }

    /// Succeeded pod: persist results, stamp completion, go terminal.
    async fn complete(&self, mut job: QiskitJob, pod: ExecutionPod) -> EngineResult<ReconcileAction> {
        // Persist before the phase write so Completed always implies the
        // sink content exists. The write is idempotent, so a crash between
        // the two converges on the next pass.
        let results = match self.persister.persist(&job, &pod).await {
            Ok(results) => results,
            Err(e) if e.is_permanent() => return self.fail_permanently(job, e.to_string()).await,
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        job.status.completion_time = Some(now);
        job.status.actual_cost = job
            .status
            .estimated_cost
            .clone()
            .or_else(|| Some("$0.00".to_string()));

        let wall_time = job
            .status
            .start_time
            .map(|start| format_duration(now - start));
        if let Some(mut info) = results {
            info.execution_time = wall_time.clone();
            job.status.results = Some(info);
        }
        job.status.metrics = Some(qop_api::ExecutionMetrics {
            execution_time: wall_time.clone(),
            total_time: wall_time,
            ..Default::default()
        });
        job.status.set_condition(Condition::new(
            CONDITION_SUCCEEDED,
            ConditionStatus::True,
            "ExecutionSucceeded",
            "execution workload succeeded",
        ));

        self.update_phase(job, JobPhase::Completed, "job completed successfully")
            .await
    }

    /// Failed: schedule a retry while budget remains, otherwise terminal.
    async fn handle_failed(&self, mut job: QiskitJob) -> EngineResult<ReconcileAction> {
        // Structural and validation failures carry Retryable=False and are
        // terminal regardless of the retry budget.
        if let Some(condition) = job.status.condition(CONDITION_RETRYABLE) {
            if condition.status == ConditionStatus::False {
                return Ok(ReconcileAction::done());
            }
        }

        if job.status.retries_exhausted(self.config.max_retries) {
            tracing::info!(
                job = %job.key(),
                retry_count = job.status.retry_count,
                "max retries exceeded, job permanently failed"
            );
            return Ok(ReconcileAction::done());
        }

        let attempt = job.status.retry_count + 1;
        let backoff = self.config.backoff_for(attempt);
        job.status.retry_count = attempt;
        job.status.next_retry_at =
            Some(Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default());
        job.status.phase = Some(JobPhase::Retrying);
        job.status.message = Some(format!("retrying job (attempt {attempt})"));
        self.store.update_job_status(&job).await?;
        tracing::info!(job = %job.key(), attempt, backoff_secs = backoff.as_secs(), "retry scheduled");
        Ok(ReconcileAction::after(backoff))
    }

    /// Retrying: wait out the backoff, clear attempt state, start over.
    async fn handle_retrying(&self, mut job: QiskitJob) -> EngineResult<ReconcileAction> {
        if let Some(next_retry_at) = job.status.next_retry_at {
            let now = Utc::now();
            if next_retry_at > now {
                let remaining = (next_retry_at - now)
                    .to_std()
                    .unwrap_or(self.config.error_requeue());
                return Ok(ReconcileAction::after(remaining));
            }
        }

        // Drop the failed workload so the next Running pass starts clean.
        self.workload.reset(&job).await?;

        job.status.next_retry_at = None;
        job.status.job_id = None;
        let attempt = job.status.retry_count;
        self.update_phase(
            job,
            JobPhase::Pending,
            format!("retrying job (attempt {attempt})"),
        )
        .await
    }

    /// Write a phase transition and ask for an immediate requeue so the
    /// next handler runs promptly.
    async fn update_phase(
        &self,
        mut job: QiskitJob,
        phase: JobPhase,
        message: impl Into<String>,
    ) -> EngineResult<ReconcileAction> {
        let from = job.status.phase;
        let message = message.into();
        job.status.phase = Some(phase);
        job.status.message = Some(message.clone());
        self.store.update_job_status(&job).await?;
        tracing::info!(
            job = %job.key(),
            from = from.map(|p| p.as_str()).unwrap_or(""),
            to = phase.as_str(),
            message = %message,
            "phase transition"
        );
        Ok(ReconcileAction::requeue())
    }

    /// Update the progress message (only when it changed) and keep polling.
    async fn note_progress(
        &self,
        mut job: QiskitJob,
        message: &str,
    ) -> EngineResult<ReconcileAction> {
        if job.status.message.as_deref() != Some(message) {
            job.status.message = Some(message.to_string());
            self.store.update_job_status(&job).await?;
        }
        Ok(ReconcileAction::after(self.config.running_poll()))
    }

    /// Fail the job permanently; the Failed handler will not retry it.
    async fn fail_permanently(
        &self,
        mut job: QiskitJob,
        message: impl Into<String>,
    ) -> EngineResult<ReconcileAction> {
        let message = message.into();
        job.status.set_condition(Condition::new(
            CONDITION_RETRYABLE,
            ConditionStatus::False,
            "PermanentFailure",
            message.clone(),
        ));
        self.update_phase(job, JobPhase::Failed, message).await
    }

    /// Fail the job with retry eligibility.
    async fn fail_retryable(
        &self,
        mut job: QiskitJob,
        message: impl Into<String>,
    ) -> EngineResult<ReconcileAction> {
        let message = message.into();
        job.status.set_condition(Condition::new(
            CONDITION_RETRYABLE,
            ConditionStatus::True,
            "ExecutionFailed",
            message.clone(),
        ));
        self.update_phase(job, JobPhase::Failed, message).await
    }
}

/// Compact wall-time rendering ("7.3s", "2m05s", "1h12m").
fn format_duration(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    let secs = millis / 1000;
    if secs < 60 {
        format!("{}.{}s", secs, (millis % 1000) / 100)
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}
