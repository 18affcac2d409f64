//! Engine error types.
//!
//! Errors are categorized by how the reconciler reacts:
//!
//! | Category | Variants | Reaction |
//! |----------|----------|----------|
//! | **Transient** | `Store(Conflict)`, `ValidationUnavailable`, `Http` | Delayed requeue, never surfaced as Failed |
//! | **Permanent** | `InvalidCircuit`, `UnsupportedBackend`, `UnsupportedCircuitSource`, `UnsupportedSink` | Phase → Failed, not retried |
//! | **Execution** | `WorkloadFailed` | Phase → Failed, retried up to the cap |

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while reconciling a job.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] qop_store::StoreError),

    /// The validation service rejected the circuit (user error).
    #[error("circuit validation failed: {0}")]
    InvalidCircuit(String),

    /// The validation service could not be reached (transient).
    #[error("validation service unavailable: {0}")]
    ValidationUnavailable(String),

    /// No adapter is registered for the requested backend type.
    #[error("backend type '{0}' is not supported yet, use 'local_simulator'")]
    UnsupportedBackend(String),

    /// The circuit source kind cannot be materialized into a workload.
    #[error("circuit source '{0}' is not supported yet")]
    UnsupportedCircuitSource(String),

    /// The configured result sink kind is not implemented.
    #[error("output type '{0}' is not supported yet")]
    UnsupportedSink(String),

    /// The adapter does not implement the requested capability.
    #[error("backend '{backend}' does not support {capability}")]
    CapabilityUnsupported {
        backend: String,
        capability: &'static str,
    },

    /// The child workload terminated unsuccessfully.
    #[error("execution workload failed: {0}")]
    WorkloadFailed(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal engine error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the failure should fail the job permanently rather than be
    /// retried by the host loop.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidCircuit(_)
                | EngineError::UnsupportedBackend(_)
                | EngineError::UnsupportedCircuitSource(_)
                | EngineError::UnsupportedSink(_)
                | EngineError::CapabilityUnsupported { .. }
        )
    }
}
