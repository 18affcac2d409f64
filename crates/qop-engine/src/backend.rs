//! Backend adapter capability.
//!
//! Every backend family is reached through the same capability surface:
//! cost estimation, submission, observation, cancellation, authentication,
//! and a telemetry snapshot for selection scoring. The local simulator runs
//! in-cluster through the execution workload, so its adapter only carries
//! the cost and telemetry capabilities.

use async_trait::async_trait;

use qop_api::{BackendType, QiskitJob};

use crate::error::{EngineError, EngineResult};

/// A cost estimate for executing a job.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub amount: f64,
    pub currency: Currency,
}

/// Supported billing currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Usd,
}

impl CostEstimate {
    /// A zero-cost estimate (simulators).
    pub fn free() -> Self {
        Self {
            amount: 0.0,
            currency: Currency::Usd,
        }
    }

    /// Currency-prefixed rendering, e.g. `"$0.00"`.
    pub fn formatted(&self) -> String {
        match self.currency {
            Currency::Usd => format!("${:.2}", self.amount),
        }
    }
}

/// State of a job submitted to a remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteJobState {
    Queued,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

/// A live telemetry snapshot used for selection scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTelemetry {
    /// Concrete backend name.
    pub name: String,
    /// Whether the backend is reachable and accepting jobs.
    pub available: bool,
    /// Cost per shot in USD.
    pub cost_per_shot: f64,
    /// Jobs currently queued ahead of a new submission.
    pub queue_length: u32,
    /// Number of qubits the backend offers.
    pub qubits: u32,
}

/// Capability surface of a quantum backend family.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Concrete backend name this adapter resolves to.
    fn name(&self) -> &str;

    /// The backend family this adapter serves.
    fn backend_type(&self) -> BackendType;

    /// Estimate the cost of executing the given job.
    async fn estimate_cost(&self, job: &QiskitJob) -> EngineResult<CostEstimate>;

    /// Submit a job, returning the provider's job identifier.
    async fn submit(&self, job: &QiskitJob) -> EngineResult<String>;

    /// Observe a previously submitted job.
    async fn observe(&self, remote_id: &str) -> EngineResult<RemoteJobState>;

    /// Cancel a previously submitted job.
    async fn cancel(&self, remote_id: &str) -> EngineResult<()>;

    /// Establish or refresh credentials with the provider.
    async fn authenticate(&self) -> EngineResult<()>;

    /// A telemetry snapshot for selection scoring.
    async fn telemetry(&self) -> EngineResult<BackendTelemetry>;
}

/// Adapter for the in-cluster local simulator.
///
/// Execution happens through the per-job workload rather than a provider
/// API, so the submission capabilities report themselves unsupported.
pub struct LocalSimulatorAdapter;

/// Qubits the bundled statevector simulator can handle comfortably.
const SIMULATOR_QUBITS: u32 = 32;

#[async_trait]
impl BackendAdapter for LocalSimulatorAdapter {
    fn name(&self) -> &str {
        "local_simulator"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::LocalSimulator
    }

    async fn estimate_cost(&self, _job: &QiskitJob) -> EngineResult<CostEstimate> {
        Ok(CostEstimate::free())
    }

    async fn submit(&self, _job: &QiskitJob) -> EngineResult<String> {
        Err(EngineError::CapabilityUnsupported {
            backend: self.name().to_string(),
            capability: "remote submission (runs in-cluster via the execution workload)",
        })
    }

    async fn observe(&self, _remote_id: &str) -> EngineResult<RemoteJobState> {
        Err(EngineError::CapabilityUnsupported {
            backend: self.name().to_string(),
            capability: "remote observation",
        })
    }

    async fn cancel(&self, _remote_id: &str) -> EngineResult<()> {
        Err(EngineError::CapabilityUnsupported {
            backend: self.name().to_string(),
            capability: "remote cancellation",
        })
    }

    async fn authenticate(&self) -> EngineResult<()> {
        // No credentials required for the in-cluster simulator.
        Ok(())
    }

    async fn telemetry(&self) -> EngineResult<BackendTelemetry> {
        Ok(BackendTelemetry {
            name: self.name().to_string(),
            available: true,
            cost_per_shot: 0.0,
            queue_length: 0,
            qubits: SIMULATOR_QUBITS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_formatting() {
        assert_eq!(CostEstimate::free().formatted(), "$0.00");
        let estimate = CostEstimate {
            amount: 1.5,
            currency: Currency::Usd,
        };
        assert_eq!(estimate.formatted(), "$1.50");
    }

    #[tokio::test]
    async fn test_local_simulator_adapter() {
        let adapter = LocalSimulatorAdapter;
        assert_eq!(adapter.name(), "local_simulator");
        assert_eq!(adapter.backend_type(), BackendType::LocalSimulator);

        let telemetry = adapter.telemetry().await.unwrap();
        assert!(telemetry.available);
        assert_eq!(telemetry.cost_per_shot, 0.0);

        assert!(adapter.authenticate().await.is_ok());
        assert!(matches!(
            adapter.observe("x").await,
            Err(EngineError::CapabilityUnsupported { .. })
        ));
    }
}
