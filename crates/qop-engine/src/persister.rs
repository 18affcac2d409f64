//! Result persistence.
//!
//! On job completion the engine materializes a result document at the sink
//! declared in `spec.output`. The configmap sink is implemented; the other
//! declared sink kinds reject with an unsupported error until an adapter
//! lands. Persistence is idempotent: re-running it for the same job state
//! overwrites the sink with identical content.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use qop_api::{NamespacedName, ObjectMeta, OutputType, QiskitJob, ResultsInfo};
use qop_store::{ClusterStore, ConfigObject, ExecutionPod, StoreError};

use crate::error::{EngineError, EngineResult};

/// Key under which the result document is stored in a configmap sink.
pub const RESULTS_KEY: &str = "results.json";

/// Measurement counts keyed by bitstring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultCounts {
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

/// The document describing a completed job's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub job_id: String,
    pub job_name: String,
    pub backend: String,
    pub shots: u32,
    pub results: ResultCounts,
    pub status: String,
}

impl ResultDocument {
    /// Build the document for a completed job from its succeeded pod.
    ///
    /// The executor contract says pod stdout includes a JSON document with
    /// a `results` key; when it parses, its counts are taken. Identity
    /// fields always come from the job so the document is well-formed even
    /// against a misbehaving executor.
    pub fn for_job(job: &QiskitJob, pod: &ExecutionPod) -> Self {
        let counts = pod
            .status
            .log
            .as_deref()
            .and_then(parse_counts_from_log)
            .unwrap_or_default();

        Self {
            job_id: job
                .status
                .job_id
                .clone()
                .unwrap_or_else(|| pod.metadata.name.clone()),
            job_name: job.metadata.name.clone(),
            backend: job
                .status
                .selected_backend
                .clone()
                .unwrap_or_else(|| job.spec.backend.backend_type.to_string()),
            shots: job.spec.execution.effective_shots(),
            results: ResultCounts { counts },
            status: "completed".to_string(),
        }
    }

    /// Fraction of requested shots accounted for by the counts, in [0, 1].
    pub fn success_rate(&self) -> f64 {
        if self.shots == 0 {
            return 0.0;
        }
        let measured: u64 = self.results.counts.values().sum();
        (measured as f64 / f64::from(self.shots)).min(1.0)
    }
}

/// Extract measurement counts from executor stdout.
///
/// The log may carry other lines around the document, so this scans for the
/// outermost JSON object and accepts either `{"results": {"counts": ..}}`
/// or a bare `{"counts": ..}`.
fn parse_counts_from_log(log: &str) -> Option<BTreeMap<String, u64>> {
    let start = log.find('{')?;
    let end = log.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&log[start..=end]).ok()?;

    let counts = value
        .get("results")
        .and_then(|r| r.get("counts"))
        .or_else(|| value.get("counts"))?;

    serde_json::from_value(counts.clone()).ok()
}

/// A destination for result documents.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Write the document, returning its location. Must be idempotent.
    async fn persist(&self, job: &QiskitJob, document: &ResultDocument) -> EngineResult<String>;
}

/// Sink writing the document into a config object in the job's namespace.
pub struct ConfigMapSink {
    store: Arc<dyn ClusterStore>,
}

impl ConfigMapSink {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResultSink for ConfigMapSink {
    async fn persist(&self, job: &QiskitJob, document: &ResultDocument) -> EngineResult<String> {
        let output = job
            .spec
            .output
            .as_ref()
            .ok_or_else(|| EngineError::Internal("sink invoked without output spec".to_string()))?;
        let location = output.location.clone();
        let payload = serde_json::to_string_pretty(document)?;
        let key = NamespacedName::new(job.metadata.namespace.clone(), location.clone());

        if let Some(mut existing) = self.store.get_config_object(&key).await? {
            if existing.data.get(RESULTS_KEY).map(String::as_str) != Some(payload.as_str()) {
                existing.data.insert(RESULTS_KEY.to_string(), payload);
                self.store.update_config_object(&existing).await?;
            }
            return Ok(location);
        }

        let metadata = ObjectMeta::new(job.metadata.namespace.clone(), location.clone())
            .with_label("app", "qiskit-operator")
            .with_label("quantum.io/job", job.metadata.name.clone())
            .with_owner(job.controller_owner_ref());
        let object = ConfigObject::with_entry(metadata, RESULTS_KEY, payload);

        match self.store.create_config_object(object).await {
            Ok(_) | Err(StoreError::AlreadyExists { .. }) => Ok(location),
            Err(e) => Err(e.into()),
        }
    }
}

/// Routes result documents to the sink declared on the job.
pub struct ResultPersister {
    config_map_sink: ConfigMapSink,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self {
            config_map_sink: ConfigMapSink::new(store),
        }
    }

    /// Persist the result document for a completed job, if the job declares
    /// an output. Returns the results summary for the job status.
    pub async fn persist(
        &self,
        job: &QiskitJob,
        pod: &ExecutionPod,
    ) -> EngineResult<Option<ResultsInfo>> {
        let Some(output) = &job.spec.output else {
            return Ok(None);
        };

        let document = ResultDocument::for_job(job, pod);
        let location = match output.output_type {
            OutputType::Configmap => self.config_map_sink.persist(job, &document).await?,
            other => return Err(EngineError::UnsupportedSink(other.to_string())),
        };

        Ok(Some(ResultsInfo {
            location: Some(location),
            shots: document.shots,
            execution_time: None,
            quantum_time: None,
            success_rate: Some(document.success_rate()),
        }))
    }
}
