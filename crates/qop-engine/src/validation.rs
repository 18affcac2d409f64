//! Client for the circuit validation service.
//!
//! The service analyzes a circuit without executing it and reports hash,
//! depth, qubit count, and a gate histogram. Wire protocol: JSON over HTTP,
//! `POST /validate`, health probe at `GET /health`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use qop_api::CircuitMetadata;

use crate::error::{EngineError, EngineResult};

/// Request payload for `POST /validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRequest {
    /// Circuit source code.
    pub code: String,
    /// Target backend name, when one is already known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_name: Option<String>,
    /// Requested transpiler optimization level.
    pub optimization_level: u8,
}

/// Response payload from `POST /validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub circuit_hash: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub qubits: u32,
    #[serde(default)]
    pub gates: u32,
    #[serde(default)]
    pub gate_types: BTreeMap<String, u32>,
    #[serde(default)]
    pub estimated_execution_time: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResponse {
    /// The analyzer's findings as circuit metadata for the job status.
    pub fn circuit_metadata(&self) -> CircuitMetadata {
        CircuitMetadata {
            hash: self.circuit_hash.clone(),
            depth: self.depth,
            qubits: self.qubits,
            gates: self.gates,
            gate_types: self.gate_types.clone(),
        }
    }

    /// All analyzer errors joined into one message.
    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }
}

/// Analyzes circuits before execution.
#[async_trait]
pub trait CircuitValidator: Send + Sync {
    /// Analyze a circuit. A reachable service always yields a response;
    /// `valid == false` with populated `errors` means the circuit itself is
    /// bad. Transport failures surface as
    /// [`EngineError::ValidationUnavailable`].
    async fn validate(&self, request: &ValidationRequest) -> EngineResult<ValidationResponse>;
}

/// HTTP client for the validation service.
pub struct ValidationClient {
    client: Client,
    base_url: String,
}

impl ValidationClient {
    /// Create a client for the service at `base_url` with the given
    /// per-request deadline.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Probe the service health endpoint.
    pub async fn health(&self) -> EngineResult<bool> {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

impl std::fmt::Debug for ValidationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl CircuitValidator for ValidationClient {
    async fn validate(&self, request: &ValidationRequest) -> EngineResult<ValidationResponse> {
        let url = format!("{}/validate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| EngineError::ValidationUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::ValidationUnavailable(format!(
                "validation service returned {}",
                response.status()
            )));
        }

        response
            .json::<ValidationResponse>()
            .await
            .map_err(|e| EngineError::ValidationUnavailable(e.to_string()))
    }
}
