//! Engine-owned status types for the `QiskitJob` resource.
//!
//! # Lifecycle
//!
//! The phase state machine driven by the reconciliation engine:
//!
//! ```text
//!   ∅ ──→ Pending ──→ Validating ──→ Scheduling ──→ Running ──→ Completed
//!            ↑             │              │             │
//!            │             └──────────────┴─────────────┴──→ Failed
//!            │                                                  │
//!            └────────────────── Retrying ←─────────────────────┘
//!                                           (retryCount < max)
//! ```
//!
//! Completed, Cancelled, and Failed-with-retries-exhausted are terminal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Position of a job in its lifecycle.
///
/// The wire format is an open string (older engine versions may have written
/// values this version does not know); anything unrecognized deserializes to
/// [`JobPhase::Unknown`] and is reset to Pending by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobPhase {
    Pending,
    Validating,
    Scheduling,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
    Unknown,
}

impl<'de> Deserialize<'de> for JobPhase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(JobPhase::parse_lossy(&value))
    }
}

impl JobPhase {
    /// Parse a wire string, mapping unrecognized values to `Unknown`.
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "Pending" => JobPhase::Pending,
            "Validating" => JobPhase::Validating,
            "Scheduling" => JobPhase::Scheduling,
            "Running" => JobPhase::Running,
            "Completed" => JobPhase::Completed,
            "Failed" => JobPhase::Failed,
            "Cancelled" => JobPhase::Cancelled,
            "Retrying" => JobPhase::Retrying,
            _ => JobPhase::Unknown,
        }
    }
    /// The wire name of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Pending => "Pending",
            JobPhase::Validating => "Validating",
            JobPhase::Scheduling => "Scheduling",
            JobPhase::Running => "Running",
            JobPhase::Completed => "Completed",
            JobPhase::Failed => "Failed",
            JobPhase::Cancelled => "Cancelled",
            JobPhase::Retrying => "Retrying",
            JobPhase::Unknown => "Unknown",
        }
    }

    /// Whether this phase is unconditionally terminal.
    ///
    /// Failed is terminal only once retries are exhausted, which is a
    /// status-level question; see [`JobStatus::retries_exhausted`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Cancelled)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truth value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A typed, latest-wins status bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within the condition list.
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with the current time.
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Information about the selected backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qubits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_error: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readout_error: Option<f64>,
}

/// Information about where results landed and how the run went.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsInfo {
    /// Location of the result document (sink-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Number of shots executed.
    #[serde(default)]
    pub shots: u32,

    /// Total execution wall time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,

    /// Time spent on quantum hardware.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantum_time: Option<String>,

    /// Fraction of shots that produced a usable measurement, in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

/// Detailed execution timing and resource metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<String>,
}

/// Circuit analysis metadata produced by the validation service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitMetadata {
    /// Content hash of the circuit source.
    pub hash: String,
    pub depth: u32,
    pub qubits: u32,
    /// Total gate count.
    pub gates: u32,
    /// Gate histogram by gate name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gate_types: BTreeMap<String, u32>,
}

/// Observed state of a quantum job. Owned exclusively by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Lifecycle phase. Absent until the engine first observes the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<JobPhase>,

    /// Human-readable note about the current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Backend chosen by the selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_backend: Option<String>,

    /// Backend originally chosen when a fallback was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_backend: Option<String>,

    /// Whether fallback to a simulator was used.
    #[serde(default)]
    pub fallback_used: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_info: Option<BackendInfo>,

    /// Estimated cost, currency-prefixed (e.g. "$0.00").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<String>,

    /// Actual cost after execution, currency-prefixed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<String>,

    /// Position in the backend queue, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_start_time: Option<DateTime<Utc>>,

    /// External or child-workload identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultsInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ExecutionMetrics>,

    /// Number of retry attempts taken so far.
    #[serde(default)]
    pub retry_count: u32,

    /// Earliest time the next retry may start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_metadata: Option<CircuitMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl JobStatus {
    /// Record a condition, replacing any prior condition of the same type.
    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }

    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}
