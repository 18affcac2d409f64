//! Child workload management.
//!
//! Ensures exactly one execution pod exists per running job and observes
//! it. Circuit source is delivered through a per-job config object mounted
//! into the pod as a file; user code is never interpolated into a shell
//! command, so quotes, backslashes, and Unicode survive untouched.

use std::sync::Arc;

use qop_api::{CircuitSource, NamespacedName, ObjectMeta, QiskitJob};
use qop_store::{
    ClusterStore, ConfigObject, ConfigVolume, Container, EnvVar, ExecutionPod, PodResources,
    PodSpec, PodStatus, RestartPolicy, SecurityContext, StoreError, VolumeMount,
};

use crate::error::{EngineError, EngineResult};

/// Where the circuit file is mounted inside the executor container.
pub const CIRCUIT_MOUNT_PATH: &str = "/opt/circuit";

/// File name of the circuit source within the mount.
pub const CIRCUIT_FILE: &str = "circuit.py";

/// Name of the execution pod for a job.
pub fn pod_name(job_name: &str) -> String {
    format!("qiskit-job-{job_name}")
}

/// Name of the config object carrying a job's circuit source.
pub fn circuit_object_name(job_name: &str) -> String {
    format!("qiskit-job-{job_name}-circuit")
}

/// Outcome of an ensure pass.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsureOutcome {
    /// The pod was created by this pass.
    Created(ExecutionPod),
    /// The pod already existed.
    Existing(ExecutionPod),
}

impl EnsureOutcome {
    /// The pod, regardless of how it got there.
    pub fn pod(&self) -> &ExecutionPod {
        match self {
            EnsureOutcome::Created(pod) | EnsureOutcome::Existing(pod) => pod,
        }
    }
}

/// Creates and supervises one execution pod per active job.
pub struct WorkloadManager {
    store: Arc<dyn ClusterStore>,
    executor_image: String,
}

impl WorkloadManager {
    /// Create a manager that builds pods from the given executor image.
    pub fn new(store: Arc<dyn ClusterStore>, executor_image: impl Into<String>) -> Self {
        Self {
            store,
            executor_image: executor_image.into(),
        }
    }

    /// Ensure the job's execution pod exists. Idempotent: at most one pod
    /// is ever created per job, and repeat calls return the existing one.
    pub async fn ensure(&self, job: &QiskitJob) -> EngineResult<EnsureOutcome> {
        let key = NamespacedName::new(job.metadata.namespace.clone(), pod_name(&job.metadata.name));

        if let Some(pod) = self.store.get_pod(&key).await? {
            return Ok(EnsureOutcome::Existing(pod));
        }

        let code = self.resolve_circuit_code(job).await?;
        self.upsert_circuit_object(job, &code).await?;

        let pod = build_pod(job, &self.executor_image);
        match self.store.create_pod(pod).await {
            Ok(pod) => {
                tracing::info!(pod = %pod.key(), "execution pod created");
                Ok(EnsureOutcome::Created(pod))
            }
            // Lost a creation race; the winner's pod is the one we want.
            Err(StoreError::AlreadyExists { .. }) => {
                let pod = self.store.get_pod(&key).await?.ok_or_else(|| {
                    EngineError::Internal(format!("pod {key} vanished during creation"))
                })?;
                Ok(EnsureOutcome::Existing(pod))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Observe the job's execution pod, if any.
    pub async fn observe(&self, job: &QiskitJob) -> EngineResult<Option<ExecutionPod>> {
        let key = NamespacedName::new(job.metadata.namespace.clone(), pod_name(&job.metadata.name));
        Ok(self.store.get_pod(&key).await?)
    }

    /// Delete the job's pod so a retry attempt can start clean. The circuit
    /// config object is kept; its content is still current.
    pub async fn reset(&self, job: &QiskitJob) -> EngineResult<()> {
        let key = NamespacedName::new(job.metadata.namespace.clone(), pod_name(&job.metadata.name));
        if self.store.delete_pod(&key).await? {
            tracing::info!(pod = %key, "execution pod removed for retry");
        }
        Ok(())
    }

    /// Tear down everything this manager created for the job. Idempotent:
    /// absent resources are ignored.
    pub async fn teardown(&self, job: &QiskitJob) -> EngineResult<()> {
        let namespace = job.metadata.namespace.clone();
        let pod_key = NamespacedName::new(namespace.clone(), pod_name(&job.metadata.name));
        self.store.delete_pod(&pod_key).await?;

        let object_key = NamespacedName::new(namespace, circuit_object_name(&job.metadata.name));
        self.store.delete_config_object(&object_key).await?;
        Ok(())
    }

    /// Resolve the circuit source code for a job.
    ///
    /// Also used by the validation phase, so a job whose circuit cannot be
    /// materialized fails before any workload is created.
    pub async fn resolve_circuit_code(&self, job: &QiskitJob) -> EngineResult<String> {
        match job.spec.circuit.source {
            CircuitSource::Inline => job
                .spec
                .circuit
                .code
                .clone()
                .ok_or_else(|| EngineError::Internal("inline circuit has no code".to_string())),
            CircuitSource::Configmap => {
                let reference = job.spec.circuit.config_map_ref.as_ref().ok_or_else(|| {
                    EngineError::Internal("configmap circuit has no reference".to_string())
                })?;
                let key =
                    NamespacedName::new(job.metadata.namespace.clone(), reference.name.clone());
                let object = self.store.get_config_object(&key).await?.ok_or_else(|| {
                    EngineError::Internal(format!("circuit config object {key} not found"))
                })?;
                object.data.get(&reference.key).cloned().ok_or_else(|| {
                    EngineError::InvalidCircuit(format!(
                        "config object {key} has no key '{}'",
                        reference.key
                    ))
                })
            }
            source @ (CircuitSource::Url | CircuitSource::Git) => {
                Err(EngineError::UnsupportedCircuitSource(source.to_string()))
            }
        }
    }

    /// Create or refresh the per-job circuit config object.
    async fn upsert_circuit_object(&self, job: &QiskitJob, code: &str) -> EngineResult<()> {
        let name = circuit_object_name(&job.metadata.name);
        let key = NamespacedName::new(job.metadata.namespace.clone(), name.clone());

        if let Some(mut existing) = self.store.get_config_object(&key).await? {
            if existing.data.get(CIRCUIT_FILE).map(String::as_str) != Some(code) {
                existing
                    .data
                    .insert(CIRCUIT_FILE.to_string(), code.to_string());
                self.store.update_config_object(&existing).await?;
            }
            return Ok(());
        }

        let metadata = ObjectMeta::new(job.metadata.namespace.clone(), name)
            .with_label("app", "qiskit-operator")
            .with_label("quantum.io/job", job.metadata.name.clone())
            .with_owner(job.controller_owner_ref());
        let object = ConfigObject::with_entry(metadata, CIRCUIT_FILE, code);

        match self.store.create_config_object(object).await {
            Ok(_) | Err(StoreError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the execution pod for a job.
fn build_pod(job: &QiskitJob, executor_image: &str) -> ExecutionPod {
    let name = pod_name(&job.metadata.name);
    let shots = job.spec.execution.effective_shots();
    let optimization_level = job.spec.execution.effective_optimization_level();

    let resources = match &job.spec.resources {
        Some(requirements) => PodResources {
            requests: requirements.requests.clone(),
            limits: requirements.limits.clone(),
        },
        None => PodResources::executor_defaults(),
    };

    let metadata = ObjectMeta::new(job.metadata.namespace.clone(), name)
        .with_label("app", "qiskit-operator")
        .with_label("quantum.io/job", job.metadata.name.clone())
        .with_label(
            "quantum.io/backend-type",
            job.spec.backend.backend_type.as_str(),
        )
        .with_owner(job.controller_owner_ref());

    ExecutionPod {
        metadata,
        spec: PodSpec {
            containers: vec![Container {
                name: "executor".to_string(),
                image: executor_image.to_string(),
                command: vec![
                    "python3".to_string(),
                    format!("{CIRCUIT_MOUNT_PATH}/{CIRCUIT_FILE}"),
                ],
                env: vec![
                    EnvVar::new("SHOTS", shots.to_string()),
                    EnvVar::new("OPTIMIZATION_LEVEL", optimization_level.to_string()),
                ],
                resources,
                security_context: SecurityContext::restricted(),
                volume_mounts: vec![VolumeMount {
                    name: "circuit".to_string(),
                    mount_path: CIRCUIT_MOUNT_PATH.to_string(),
                    read_only: true,
                }],
            }],
            restart_policy: RestartPolicy::Never,
            volumes: vec![ConfigVolume {
                name: "circuit".to_string(),
                config_object: circuit_object_name(&job.metadata.name),
            }],
        },
        status: PodStatus::default(),
    }
}
