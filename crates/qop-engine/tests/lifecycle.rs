//! End-to-end lifecycle scenarios driven through the reconciler against an
//! in-memory store, with pod phase transitions applied by hand the way the
//! scheduling substrate would.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use qop_api::{
    BackendSpec, BackendType, CircuitSpec, ExecutionSpec, JobPhase, JobSpec, NamespacedName,
    OutputSpec, QiskitJob,
};
use qop_engine::{
    BackendSelector, CircuitValidator, EngineConfig, EngineResult, Reconciler, ValidationRequest,
    ValidationResponse, FINALIZER,
};
use qop_store::{ClusterStore, MemoryStore, PodStatus};

const BELL_CIRCUIT: &str = r#"
from qiskit import QuantumCircuit
qc = QuantumCircuit(2, 2)
qc.h(0)
qc.cx(0, 1)
qc.measure([0, 1], [0, 1])
"#;

const EXECUTOR_LOG: &str =
    r#"{"job_id": "x", "results": {"counts": {"00": 512, "11": 512}}, "status": "completed"}"#;

/// Validator stub with configurable behavior.
enum StubValidator {
    Accept,
    Reject(Vec<String>),
}

#[async_trait]
impl CircuitValidator for StubValidator {
    async fn validate(&self, request: &ValidationRequest) -> EngineResult<ValidationResponse> {
        match self {
            StubValidator::Accept => Ok(ValidationResponse {
                valid: true,
                circuit_hash: format!("sha-{}", request.code.len()),
                depth: 3,
                qubits: 2,
                gates: 5,
                gate_types: BTreeMap::from([
                    ("h".to_string(), 1),
                    ("cx".to_string(), 1),
                    ("measure".to_string(), 2),
                ]),
                estimated_execution_time: 0.02,
                errors: vec![],
                warnings: vec![],
            }),
            StubValidator::Reject(errors) => Ok(ValidationResponse {
                valid: false,
                circuit_hash: "sha-invalid".to_string(),
                depth: 0,
                qubits: 0,
                gates: 0,
                gate_types: BTreeMap::new(),
                estimated_execution_time: 0.0,
                errors: errors.clone(),
                warnings: vec![],
            }),
        }
    }
}

fn engine_with(store: Arc<MemoryStore>, validator: StubValidator, config: EngineConfig) -> Reconciler {
    Reconciler::new(
        store,
        Arc::new(validator),
        BackendSelector::with_local_simulator(),
        config,
    )
}

fn engine(store: Arc<MemoryStore>) -> Reconciler {
    engine_with(store, StubValidator::Accept, EngineConfig::default())
}

/// Engine config whose retry backoff elapses immediately, so tests can
/// walk the Failed → Retrying → Pending edge without sleeping.
fn no_backoff_config() -> EngineConfig {
    EngineConfig {
        retry_backoff_base_secs: 0,
        ..Default::default()
    }
}

fn bell_job(name: &str, output: Option<OutputSpec>) -> QiskitJob {
    QiskitJob::new(
        "default",
        name,
        JobSpec {
            backend: BackendSpec::of_type(BackendType::LocalSimulator),
            circuit: CircuitSpec::inline(BELL_CIRCUIT),
            execution: ExecutionSpec::default(),
            session: None,
            resources: None,
            budget: None,
            output,
            credentials: None,
            backend_selection: None,
        },
    )
}

fn pod_key(job_name: &str) -> NamespacedName {
    NamespacedName::new("default", format!("qiskit-job-{job_name}"))
}

/// Reconcile repeatedly until the job reaches the target phase, recording
/// the phases seen along the way. Panics if it does not converge.
async fn drive_until(
    engine: &Reconciler,
    store: &Arc<MemoryStore>,
    key: &NamespacedName,
    target: JobPhase,
) -> (QiskitJob, Vec<JobPhase>) {
    let mut trajectory = Vec::new();
    for _ in 0..32 {
        engine.reconcile(key).await.expect("reconcile failed");
        let job = store.get_job(key).await.unwrap().expect("job vanished");
        if let Some(phase) = job.status.phase {
            if trajectory.last() != Some(&phase) {
                trajectory.push(phase);
            }
            if phase == target {
                return (job, trajectory);
            }
        }
    }
    panic!("job never reached {target}, saw {trajectory:?}");
}

#[tokio::test]
async fn bell_state_happy_path() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    let created = store
        .create_job(bell_job("bell", Some(OutputSpec::configmap("bell-state-results"))))
        .await
        .unwrap();
    let key = created.key();
    let original_spec = created.spec.clone();

    // Drive to Running and let the workload get created.
    let (job, trajectory) = drive_until(&engine, &store, &key, JobPhase::Running).await;
    assert_eq!(
        trajectory,
        vec![
            JobPhase::Pending,
            JobPhase::Validating,
            JobPhase::Scheduling,
            JobPhase::Running
        ]
    );
    assert_eq!(job.status.selected_backend.as_deref(), Some("local_simulator"));
    assert_eq!(job.status.estimated_cost.as_deref(), Some("$0.00"));
    assert!(job.status.circuit_metadata.is_some());

    engine.reconcile(&key).await.unwrap();

    // Exactly one workload exists while Running, owned by the job, with
    // defaulted execution parameters in its environment.
    let pods = store
        .list_pods_owned_by("default", job.metadata.uid)
        .await
        .unwrap();
    assert_eq!(pods.len(), 1);
    let container = &pods[0].spec.containers[0];
    assert!(container
        .env
        .iter()
        .any(|e| e.name == "SHOTS" && e.value == "1024"));
    assert!(container
        .env
        .iter()
        .any(|e| e.name == "OPTIMIZATION_LEVEL" && e.value == "1"));

    // Polling while the pod runs is idempotent: status settles.
    store
        .update_pod_status(
            &pod_key("bell"),
            PodStatus {
                phase: qop_store::PodPhase::Running,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.reconcile(&key).await.unwrap();
    let settled = store.get_job(&key).await.unwrap().unwrap();
    engine.reconcile(&key).await.unwrap();
    let resettled = store.get_job(&key).await.unwrap().unwrap();
    assert_eq!(settled.status, resettled.status);
    assert_eq!(
        settled.metadata.resource_version,
        resettled.metadata.resource_version
    );

    // Pod succeeds; the job completes and the results land at the sink.
    store
        .update_pod_status(&pod_key("bell"), PodStatus::succeeded(EXECUTOR_LOG))
        .await
        .unwrap();
    let (job, _) = drive_until(&engine, &store, &key, JobPhase::Completed).await;

    assert_eq!(job.status.actual_cost.as_deref(), Some("$0.00"));
    let completion = job.status.completion_time.expect("completionTime unset");
    let start = job.status.start_time.expect("startTime unset");
    assert!(start <= completion);
    assert!(job.status.metrics.is_some());

    let results = job.status.results.as_ref().expect("results info unset");
    assert_eq!(results.location.as_deref(), Some("bell-state-results"));
    assert_eq!(results.shots, 1024);
    assert!((results.success_rate.unwrap() - 1.0).abs() < 1e-9);

    let sink = store
        .get_config_object(&NamespacedName::new("default", "bell-state-results"))
        .await
        .unwrap()
        .expect("results object missing");
    assert!(sink.data.contains_key("results.json"));
    assert!(sink.metadata.owned_by(job.metadata.uid));
    assert!(sink.data.get("results.json").unwrap().contains("\"00\""));

    // The engine never mutated the spec.
    assert_eq!(job.spec, original_spec);

    // Terminal: further reconciles write nothing.
    engine.reconcile(&key).await.unwrap();
    let after = store.get_job(&key).await.unwrap().unwrap();
    assert_eq!(after.metadata.resource_version, job.metadata.resource_version);
}

#[tokio::test]
async fn missing_inline_code_is_rejected_without_retry() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    let mut job = bell_job("no-code", None);
    job.spec.circuit.code = None;
    let key = store.create_job(job).await.unwrap().key();

    let (job, trajectory) = drive_until(&engine, &store, &key, JobPhase::Failed).await;
    assert_eq!(trajectory, vec![JobPhase::Pending, JobPhase::Failed]);
    assert!(job.status.message.as_deref().unwrap().contains("inline"));
    assert_eq!(job.status.retry_count, 0);

    // No workload was ever created.
    assert!(store.get_pod(&pod_key("no-code")).await.unwrap().is_none());

    // Structural failure is terminal: no retry is scheduled.
    engine.reconcile(&key).await.unwrap();
    let job = store.get_job(&key).await.unwrap().unwrap();
    assert_eq!(job.status.phase, Some(JobPhase::Failed));
    assert_eq!(job.status.retry_count, 0);
    assert!(job.status.next_retry_at.is_none());
}

#[tokio::test]
async fn analyzer_rejection_is_a_permanent_failure() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        store.clone(),
        StubValidator::Reject(vec![
            "syntax error at line 2".to_string(),
            "no measurements".to_string(),
        ]),
        EngineConfig::default(),
    );
    let key = store.create_job(bell_job("bad", None)).await.unwrap().key();

    let (job, _) = drive_until(&engine, &store, &key, JobPhase::Failed).await;
    let message = job.status.message.unwrap();
    assert!(message.contains("syntax error at line 2"));
    assert!(message.contains("no measurements"));
    assert_eq!(job.status.retry_count, 0);
}

#[tokio::test]
async fn unsupported_backend_fails_in_scheduling() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    let mut job = bell_job("ibm", None);
    job.spec.backend = BackendSpec::of_type(BackendType::IbmQuantum);
    let key = store.create_job(job).await.unwrap().key();

    let (job, trajectory) = drive_until(&engine, &store, &key, JobPhase::Failed).await;
    assert_eq!(
        trajectory,
        vec![
            JobPhase::Pending,
            JobPhase::Validating,
            JobPhase::Scheduling,
            JobPhase::Failed
        ]
    );
    assert!(job
        .status
        .message
        .as_deref()
        .unwrap()
        .contains("local_simulator"));
    assert!(store.get_pod(&pod_key("ibm")).await.unwrap().is_none());
}

#[tokio::test]
async fn execution_failure_retries_to_exhaustion() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), StubValidator::Accept, no_backoff_config());
    let key = store
        .create_job(bell_job("flaky", None))
        .await
        .unwrap()
        .key();

    // Initial attempt plus three retries, each ending in a pod failure.
    for attempt in 0..4 {
        let (_, _) = drive_until(&engine, &store, &key, JobPhase::Running).await;
        engine.reconcile(&key).await.unwrap();
        assert!(
            store.get_pod(&pod_key("flaky")).await.unwrap().is_some(),
            "attempt {attempt}: pod missing"
        );
        store
            .update_pod_status(&pod_key("flaky"), PodStatus::failed(1, "raised at runtime"))
            .await
            .unwrap();
        let (job, _) = drive_until(&engine, &store, &key, JobPhase::Failed).await;
        assert!(job.status.retry_count <= 3);
    }

    // Retry budget spent: Failed is now terminal.
    engine.reconcile(&key).await.unwrap();
    let job = store.get_job(&key).await.unwrap().unwrap();
    assert_eq!(job.status.phase, Some(JobPhase::Failed));
    assert_eq!(job.status.retry_count, 3);

    // And stays terminal.
    engine.reconcile(&key).await.unwrap();
    let job = store.get_job(&key).await.unwrap().unwrap();
    assert_eq!(job.status.phase, Some(JobPhase::Failed));
    assert_eq!(job.status.retry_count, 3);
}

#[tokio::test]
async fn retry_counts_step_through_the_budget() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), StubValidator::Accept, no_backoff_config());
    let key = store
        .create_job(bell_job("steps", None))
        .await
        .unwrap()
        .key();

    let mut observed = vec![];
    for _ in 0..4 {
        drive_until(&engine, &store, &key, JobPhase::Running).await;
        engine.reconcile(&key).await.unwrap();
        store
            .update_pod_status(&pod_key("steps"), PodStatus::failed(1, "boom"))
            .await
            .unwrap();
        drive_until(&engine, &store, &key, JobPhase::Failed).await;
        // One more pass runs the Failed handler (schedule retry or stop).
        engine.reconcile(&key).await.unwrap();
        let current = store.get_job(&key).await.unwrap().unwrap();
        observed.push(current.status.retry_count);
        if current.status.phase == Some(JobPhase::Failed) {
            break;
        }
    }
    assert_eq!(observed, vec![1, 2, 3, 3]);
}

#[tokio::test]
async fn deletion_mid_flight_cleans_up_everything() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());
    let key = store
        .create_job(bell_job("doomed", None))
        .await
        .unwrap()
        .key();

    drive_until(&engine, &store, &key, JobPhase::Running).await;
    engine.reconcile(&key).await.unwrap();
    assert!(store.get_pod(&pod_key("doomed")).await.unwrap().is_some());

    // User deletes while Running; the guard holds the object.
    store.delete_job(&key).await.unwrap();
    let deleting = store.get_job(&key).await.unwrap().unwrap();
    assert!(deleting.metadata.is_deleting());
    assert!(deleting.metadata.has_finalizer(FINALIZER));

    // The next reconcile tears down and releases the guard.
    engine.reconcile(&key).await.unwrap();
    assert!(store.get_job(&key).await.unwrap().is_none());
    assert!(store.get_pod(&pod_key("doomed")).await.unwrap().is_none());
    let circuit_key = NamespacedName::new("default", "qiskit-job-doomed-circuit");
    assert!(store
        .get_config_object(&circuit_key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn crash_recovery_completes_without_duplicating_work() {
    let store = Arc::new(MemoryStore::new());
    let key = {
        let engine = engine(store.clone());
        let key = store
            .create_job(bell_job(
                "phoenix",
                Some(OutputSpec::configmap("phoenix-results")),
            ))
            .await
            .unwrap()
            .key();
        drive_until(&engine, &store, &key, JobPhase::Running).await;
        engine.reconcile(&key).await.unwrap();
        key
        // Engine dropped here: the process "crashed" before collection.
    };

    store
        .update_pod_status(&pod_key("phoenix"), PodStatus::succeeded(EXECUTOR_LOG))
        .await
        .unwrap();

    // A freshly started engine observes the succeeded workload and drives
    // the job to Completed.
    let restarted = engine(store.clone());
    let (job, _) = drive_until(&restarted, &store, &key, JobPhase::Completed).await;
    assert!(job.status.completion_time.is_some());

    let sink_key = NamespacedName::new("default", "phoenix-results");
    let first = store.get_config_object(&sink_key).await.unwrap().unwrap();

    // Yet another restart converges without rewriting the sink.
    let again = engine(store.clone());
    again.reconcile(&key).await.unwrap();
    let second = store.get_config_object(&sink_key).await.unwrap().unwrap();
    assert_eq!(first.data, second.data);
    assert_eq!(
        first.metadata.resource_version,
        second.metadata.resource_version
    );
}
