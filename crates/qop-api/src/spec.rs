//! User-owned spec types for the `QiskitJob` resource.
//!
//! The engine treats everything in this module as immutable input: it reads
//! spec fields but only ever writes to [`crate::status`] types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Shots applied when the spec leaves the count unset (or zero).
pub const DEFAULT_SHOTS: u32 = 1024;

/// Upper bound on the shot count accepted by any backend.
pub const MAX_SHOTS: u32 = 100_000;

/// Optimization level applied when the spec leaves it unset.
pub const DEFAULT_OPTIMIZATION_LEVEL: u8 = 1;

/// Desired state of a quantum job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Backend configuration for quantum execution.
    pub backend: BackendSpec,

    /// Circuit definition.
    pub circuit: CircuitSpec,

    /// Execution parameters (shots, optimization level, priority).
    #[serde(default)]
    pub execution: ExecutionSpec,

    /// Runtime session configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSpec>,

    /// Resource requirements for the execution workload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Budget constraints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetSpec>,

    /// Where to store results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,

    /// Credentials for backend authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsSpec>,

    /// Backend selection preferences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_selection: Option<BackendSelectionSpec>,
}

impl JobSpec {
    /// Structural validation of the spec.
    ///
    /// Returns the first violated rule as a human-readable message. This is
    /// shape checking only; circuit semantics are the validation service's
    /// concern.
    pub fn validate(&self) -> Result<(), String> {
        match self.circuit.source {
            CircuitSource::Inline => {
                if self.circuit.code.as_deref().unwrap_or("").trim().is_empty() {
                    return Err("circuit code is required for inline source".to_string());
                }
            }
            CircuitSource::Configmap => {
                if self.circuit.config_map_ref.is_none() {
                    return Err(
                        "circuit configMapRef is required for configmap source".to_string()
                    );
                }
            }
            CircuitSource::Url => {
                if self.circuit.url.as_deref().unwrap_or("").is_empty() {
                    return Err("circuit url is required for url source".to_string());
                }
            }
            CircuitSource::Git => {
                if self.circuit.git_ref.is_none() {
                    return Err("circuit gitRef is required for git source".to_string());
                }
            }
        }

        if let Some(shots) = self.execution.shots {
            if shots > MAX_SHOTS {
                return Err(format!("shots {shots} exceeds the maximum of {MAX_SHOTS}"));
            }
        }
        if let Some(level) = self.execution.optimization_level {
            if level > 3 {
                return Err(format!("optimization level {level} is out of range 0-3"));
            }
        }
        if let Some(level) = self.execution.resilience_level {
            if level > 2 {
                return Err(format!("resilience level {level} is out of range 0-2"));
            }
        }

        Ok(())
    }
}

/// Supported quantum backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    IbmQuantum,
    IbmSimulator,
    AwsBraket,
    LocalSimulator,
}

impl BackendType {
    /// The wire name of this backend type.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::IbmQuantum => "ibm_quantum",
            BackendType::IbmSimulator => "ibm_simulator",
            BackendType::AwsBraket => "aws_braket",
            BackendType::LocalSimulator => "local_simulator",
        }
    }

    /// Whether this backend type is a simulator.
    pub fn is_simulator(&self) -> bool {
        matches!(self, BackendType::IbmSimulator | BackendType::LocalSimulator)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantum backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    /// Backend family to execute on.
    #[serde(rename = "type")]
    pub backend_type: BackendType,

    /// Specific backend name (e.g. "ibm_brisbane").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// IBM Cloud instance CRN for enterprise accounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// IBM Quantum Network hub (legacy authentication).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,

    /// IBM Quantum Network group (legacy authentication).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// IBM Quantum Network project (legacy authentication).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl BackendSpec {
    /// A backend spec with only the type set.
    pub fn of_type(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            name: None,
            instance: None,
            hub: None,
            group: None,
            project: None,
        }
    }
}

/// Where circuit source code comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitSource {
    Inline,
    Configmap,
    Url,
    Git,
}

impl std::fmt::Display for CircuitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitSource::Inline => "inline",
            CircuitSource::Configmap => "configmap",
            CircuitSource::Url => "url",
            CircuitSource::Git => "git",
        };
        f.write_str(s)
    }
}

/// Circuit definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSpec {
    /// Source of the circuit code.
    pub source: CircuitSource,

    /// Inline circuit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Reference to a config object holding the circuit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ConfigMapKeyRef>,

    /// URL to fetch circuit code from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Git repository holding the circuit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<GitRef>,
}

impl CircuitSpec {
    /// An inline circuit carrying the given code.
    pub fn inline(code: impl Into<String>) -> Self {
        Self {
            source: CircuitSource::Inline,
            code: Some(code.into()),
            config_map_ref: None,
            url: None,
            git_ref: None,
        }
    }
}

/// A key within a named config object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapKeyRef {
    pub name: String,
    pub key: String,
}

/// A path within a git repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRef {
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub path: String,
}

/// Job priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Execution parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    /// Number of measurements (shots), 1-100000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shots: Option<u32>,

    /// Transpiler optimization level, 0-3.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization_level: Option<u8>,

    /// Error-mitigation resilience level, 0-2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resilience_level: Option<u8>,

    /// Maximum wall time the execution may take.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<String>,

    /// Job priority.
    #[serde(default)]
    pub priority: JobPriority,

    /// Disable automatic fallback to a simulator.
    #[serde(default)]
    pub disable_fallback: bool,
}

impl ExecutionSpec {
    /// The shot count to run with. Unset or zero falls back to the default.
    pub fn effective_shots(&self) -> u32 {
        match self.shots {
            None | Some(0) => DEFAULT_SHOTS,
            Some(shots) => shots,
        }
    }

    /// The optimization level to run with.
    pub fn effective_optimization_level(&self) -> u8 {
        self.optimization_level.unwrap_or(DEFAULT_OPTIMIZATION_LEVEL)
    }
}

/// Session mode for runtime sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Dedicated,
    Batch,
}

/// Runtime session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Maximum session time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SessionMode>,
}

/// Resource requests and limits for the execution workload, as string
/// quantities ("500m", "1Gi").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Cost constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSpec {
    /// Maximum cost for this job (e.g. "$10.00").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_center: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_account: Option<String>,
}

/// Result sink kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Pvc,
    S3,
    Gcs,
    AzureBlob,
    Configmap,
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutputType::Pvc => "pvc",
            OutputType::S3 => "s3",
            OutputType::Gcs => "gcs",
            OutputType::AzureBlob => "azure_blob",
            OutputType::Configmap => "configmap",
        };
        f.write_str(s)
    }
}

/// Result serialization formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    #[default]
    Json,
    Pickle,
    Qpy,
    Csv,
}

/// Where to store results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    /// Sink kind.
    #[serde(rename = "type")]
    pub output_type: OutputType,

    /// Storage location (config object name, bucket name, PVC name).
    pub location: String,

    /// Path within the storage location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default)]
    pub format: ResultFormat,

    /// Retention period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,
}

impl OutputSpec {
    /// A configmap sink writing to the named object.
    pub fn configmap(location: impl Into<String>) -> Self {
        Self {
            output_type: OutputType::Configmap,
            location: location.into(),
            path: None,
            format: ResultFormat::Json,
            retention: None,
        }
    }
}

/// Reference to a stored secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Authentication credentials for remote backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_path: Option<String>,
}

/// Scoring weights for backend selection, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendWeights {
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub queue_time: f64,
    #[serde(default)]
    pub capability: f64,
    #[serde(default)]
    pub availability: f64,
}

impl Default for BackendWeights {
    fn default() -> Self {
        Self {
            cost: 0.25,
            queue_time: 0.25,
            capability: 0.25,
            availability: 0.25,
        }
    }
}

/// Backend selection preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSelectionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<BackendWeights>,

    /// Preferred backends, ordered by preference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_backends: Vec<String>,

    /// Backends that must not be selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_backends: Vec<String>,

    /// Allow falling back to any other backend.
    #[serde(default)]
    pub allow_fallback: bool,

    /// Fall back to a simulator when the chosen backend is unreachable.
    #[serde(default)]
    pub fallback_to_simulator: bool,
}
