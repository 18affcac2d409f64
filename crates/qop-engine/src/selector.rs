//! Backend selection.
//!
//! Resolves a concrete backend identifier for a job from its declared
//! backend type, preference/exclusion lists, and scoring weights over live
//! backend telemetry. Ties are broken by lexical backend name so selection
//! is deterministic.

use std::sync::Arc;

use qop_api::{BackendType, BackendWeights, QiskitJob};

use crate::backend::{BackendAdapter, BackendTelemetry};
use crate::error::{EngineError, EngineResult};

/// Outcome of backend selection for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Concrete backend identifier to execute on.
    pub backend: String,
    /// Family of the selected backend.
    pub backend_type: BackendType,
    /// Currency-prefixed cost estimate.
    pub estimated_cost: String,
    /// The originally chosen backend when a fallback was taken.
    pub original_backend: Option<String>,
    /// Whether fallback to the simulator was used.
    pub fallback_used: bool,
}

/// Weighted score of a backend snapshot, in [0, 1] for weights in [0, 1].
///
/// Each dimension is normalized to [0, 1]: availability is a step, cost and
/// queue length decay hyperbolically, capability saturates at 127 qubits.
pub fn score(telemetry: &BackendTelemetry, weights: &BackendWeights) -> f64 {
    let availability = if telemetry.available { 1.0 } else { 0.0 };
    let cost = 1.0 / (1.0 + telemetry.cost_per_shot);
    let queue = 1.0 / (1.0 + f64::from(telemetry.queue_length));
    let capability = f64::from(telemetry.qubits.min(127)) / 127.0;

    weights.availability * availability
        + weights.cost * cost
        + weights.queue_time * queue
        + weights.capability * capability
}

/// Resolves backend types to adapters and picks a concrete backend per job.
pub struct BackendSelector {
    adapters: Vec<Arc<dyn BackendAdapter>>,
}

impl BackendSelector {
    /// An empty selector with no registered adapters.
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// The default selector: local simulator only.
    pub fn with_local_simulator() -> Self {
        let mut selector = Self::new();
        selector.register(Arc::new(crate::backend::LocalSimulatorAdapter));
        selector
    }

    /// Register an adapter.
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.push(adapter);
    }

    fn adapter_named(&self, name: &str) -> Option<&Arc<dyn BackendAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    /// Select a concrete backend for the given job.
    ///
    /// Candidates are the registered adapters of the job's declared type,
    /// minus exclusions. They are ranked by preference-list position, then
    /// weighted telemetry score, then lexical name. When the best candidate
    /// is unavailable and the spec allows it, selection falls back to the
    /// local simulator and records the original choice.
    pub async fn select(&self, job: &QiskitJob) -> EngineResult<Selection> {
        let requested = job.spec.backend.backend_type;
        let prefs = job.spec.backend_selection.clone().unwrap_or_default();
        let weights = prefs.weights.unwrap_or_default();

        let candidates: Vec<_> = self
            .adapters
            .iter()
            .filter(|a| a.backend_type() == requested)
            .filter(|a| !prefs.excluded_backends.iter().any(|e| e == a.name()))
            .collect();

        if candidates.is_empty() {
            return Err(EngineError::UnsupportedBackend(requested.to_string()));
        }

        let mut ranked = Vec::with_capacity(candidates.len());
        for adapter in candidates {
            let telemetry = match adapter.telemetry().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(backend = adapter.name(), error = %e, "telemetry unavailable");
                    BackendTelemetry {
                        name: adapter.name().to_string(),
                        available: false,
                        cost_per_shot: 0.0,
                        queue_length: 0,
                        qubits: 0,
                    }
                }
            };
            let preference = prefs
                .preferred_backends
                .iter()
                .position(|p| p == adapter.name())
                .unwrap_or(prefs.preferred_backends.len());
            ranked.push((preference, score(&telemetry, &weights), telemetry, adapter));
        }

        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.2.name.cmp(&b.2.name))
        });

        let (_, _, telemetry, adapter) = &ranked[0];

        if !telemetry.available {
            let fallback_allowed =
                prefs.fallback_to_simulator && !job.spec.execution.disable_fallback;
            if fallback_allowed {
                if let Some(simulator) = self.adapter_named("local_simulator") {
                    let cost = simulator.estimate_cost(job).await?;
                    return Ok(Selection {
                        backend: simulator.name().to_string(),
                        backend_type: simulator.backend_type(),
                        estimated_cost: cost.formatted(),
                        original_backend: Some(telemetry.name.clone()),
                        fallback_used: true,
                    });
                }
            }
            return Err(EngineError::Internal(format!(
                "backend '{}' is currently unavailable",
                telemetry.name
            )));
        }

        let cost = adapter.estimate_cost(job).await?;
        Ok(Selection {
            backend: adapter.name().to_string(),
            backend_type: adapter.backend_type(),
            estimated_cost: cost.formatted(),
            original_backend: None,
            fallback_used: false,
        })
    }
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::with_local_simulator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qop_api::{
        BackendSelectionSpec, BackendSpec, CircuitSpec, ExecutionSpec, JobSpec, QiskitJob,
    };

    use crate::backend::{CostEstimate, RemoteJobState};

    /// Adapter with canned telemetry.
    struct FakeAdapter {
        name: String,
        backend_type: BackendType,
        telemetry: BackendTelemetry,
    }

    impl FakeAdapter {
        fn new(name: &str, backend_type: BackendType, available: bool) -> Self {
            Self {
                name: name.to_string(),
                backend_type,
                telemetry: BackendTelemetry {
                    name: name.to_string(),
                    available,
                    cost_per_shot: 0.01,
                    queue_length: 5,
                    qubits: 127,
                },
            }
        }
    }

    #[async_trait]
    impl BackendAdapter for FakeAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn backend_type(&self) -> BackendType {
            self.backend_type
        }

        async fn estimate_cost(&self, _job: &QiskitJob) -> EngineResult<CostEstimate> {
            Ok(CostEstimate {
                amount: 1.0,
                currency: crate::backend::Currency::Usd,
            })
        }

        async fn submit(&self, _job: &QiskitJob) -> EngineResult<String> {
            Ok("remote-1".to_string())
        }

        async fn observe(&self, _remote_id: &str) -> EngineResult<RemoteJobState> {
            Ok(RemoteJobState::Queued)
        }

        async fn cancel(&self, _remote_id: &str) -> EngineResult<()> {
            Ok(())
        }

        async fn authenticate(&self) -> EngineResult<()> {
            Ok(())
        }

        async fn telemetry(&self) -> EngineResult<BackendTelemetry> {
            Ok(self.telemetry.clone())
        }
    }

    fn job_for(backend_type: BackendType) -> QiskitJob {
        QiskitJob::new(
            "default",
            "test",
            JobSpec {
                backend: BackendSpec::of_type(backend_type),
                circuit: CircuitSpec::inline("qc = QuantumCircuit(2)"),
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

    #[tokio::test]
    async fn test_selects_local_simulator() {
        let selector = BackendSelector::with_local_simulator();
        let job = job_for(BackendType::LocalSimulator);

        let selection = selector.select(&job).await.unwrap();
        assert_eq!(selection.backend, "local_simulator");
        assert_eq!(selection.estimated_cost, "$0.00");
        assert!(!selection.fallback_used);
    }

    #[tokio::test]
    async fn test_unregistered_type_is_unsupported() {
        let selector = BackendSelector::with_local_simulator();
        let job = job_for(BackendType::IbmQuantum);

        let err = selector.select(&job).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedBackend(_)));
        assert!(err.to_string().contains("local_simulator"));
    }

    #[tokio::test]
    async fn test_lexical_tie_break() {
        let mut selector = BackendSelector::new();
        selector.register(Arc::new(FakeAdapter::new(
            "ibm_osaka",
            BackendType::IbmQuantum,
            true,
        )));
        selector.register(Arc::new(FakeAdapter::new(
            "ibm_brisbane",
            BackendType::IbmQuantum,
            true,
        )));

        let job = job_for(BackendType::IbmQuantum);
        let selection = selector.select(&job).await.unwrap();
        // Identical telemetry scores tie, lexically smaller name wins.
        assert_eq!(selection.backend, "ibm_brisbane");
    }

    #[tokio::test]
    async fn test_exclusion_list_respected() {
        let mut selector = BackendSelector::new();
        selector.register(Arc::new(FakeAdapter::new(
            "ibm_brisbane",
            BackendType::IbmQuantum,
            true,
        )));
        selector.register(Arc::new(FakeAdapter::new(
            "ibm_osaka",
            BackendType::IbmQuantum,
            true,
        )));

        let mut job = job_for(BackendType::IbmQuantum);
        job.spec.backend_selection = Some(BackendSelectionSpec {
            excluded_backends: vec!["ibm_brisbane".to_string()],
            ..Default::default()
        });

        let selection = selector.select(&job).await.unwrap();
        assert_eq!(selection.backend, "ibm_osaka");
    }

    #[tokio::test]
    async fn test_fallback_to_simulator_records_original() {
        let mut selector = BackendSelector::with_local_simulator();
        selector.register(Arc::new(FakeAdapter::new(
            "ibm_brisbane",
            BackendType::IbmQuantum,
            false,
        )));

        let mut job = job_for(BackendType::IbmQuantum);
        job.spec.backend_selection = Some(BackendSelectionSpec {
            fallback_to_simulator: true,
            ..Default::default()
        });

        let selection = selector.select(&job).await.unwrap();
        assert_eq!(selection.backend, "local_simulator");
        assert!(selection.fallback_used);
        assert_eq!(selection.original_backend.as_deref(), Some("ibm_brisbane"));
        assert_eq!(selection.estimated_cost, "$0.00");
    }

    #[tokio::test]
    async fn test_disable_fallback_wins() {
        let mut selector = BackendSelector::with_local_simulator();
        selector.register(Arc::new(FakeAdapter::new(
            "ibm_brisbane",
            BackendType::IbmQuantum,
            false,
        )));

        let mut job = job_for(BackendType::IbmQuantum);
        job.spec.execution.disable_fallback = true;
        job.spec.backend_selection = Some(BackendSelectionSpec {
            fallback_to_simulator: true,
            ..Default::default()
        });

        assert!(selector.select(&job).await.is_err());
    }

    #[test]
    fn test_score_monotonicity() {
        let weights = BackendWeights::default();
        let base = BackendTelemetry {
            name: "a".to_string(),
            available: true,
            cost_per_shot: 0.0,
            queue_length: 0,
            qubits: 127,
        };

        let mut busy = base.clone();
        busy.queue_length = 50;
        assert!(score(&base, &weights) > score(&busy, &weights));

        let mut down = base.clone();
        down.available = false;
        assert!(score(&base, &weights) > score(&down, &weights));
    }
}
