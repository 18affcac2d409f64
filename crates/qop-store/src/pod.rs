//! Execution pod primitives.
//!
//! A pod here is the short-lived, isolated compute workload the engine
//! materializes per job. The model carries exactly what the engine needs:
//! container spec, mounted config volumes, resources, security context, and
//! an observed phase with the executor's terminal output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use qop_api::{NamespacedName, ObjectMeta};

/// Restart behavior after container exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    Always,
    OnFailure,
    #[default]
    Never,
}

/// Container security settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub run_as_non_root: bool,
    pub run_as_user: u32,
    pub allow_privilege_escalation: bool,
    /// Capabilities dropped from the container ("ALL" drops everything).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_capabilities: Vec<String>,
}

impl SecurityContext {
    /// The locked-down context used for circuit executors: non-root uid
    /// 1000, no privilege escalation, all capabilities dropped.
    pub fn restricted() -> Self {
        Self {
            run_as_non_root: true,
            run_as_user: 1000,
            allow_privilege_escalation: false,
            drop_capabilities: vec!["ALL".to_string()],
        }
    }
}

/// An environment variable passed to a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Compute resource requests and limits, as string quantities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodResources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl PodResources {
    /// Default executor sizing: request 500m CPU / 1Gi, limit 2 CPU / 4Gi.
    pub fn executor_defaults() -> Self {
        let mut requests = BTreeMap::new();
        requests.insert("cpu".to_string(), "500m".to_string());
        requests.insert("memory".to_string(), "1Gi".to_string());
        let mut limits = BTreeMap::new();
        limits.insert("cpu".to_string(), "2".to_string());
        limits.insert("memory".to_string(), "4Gi".to_string());
        Self { requests, limits }
    }
}

/// A volume backed by a config object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVolume {
    /// Volume name, referenced by mounts.
    pub name: String,
    /// Name of the config object providing the files.
    pub config_object: String,
}

/// A mount of a named volume into a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// A single container within a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: PodResources,
    pub security_context: SecurityContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Desired state of an execution pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ConfigVolume>,
}

/// Observed lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Whether the pod has finished (successfully or not).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Observed state of an execution pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub phase: PodPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Exit code of the executor container, once terminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured stdout of the executor container. The executor contract is
    /// that this includes a JSON result document on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl PodStatus {
    /// A succeeded status carrying the executor's stdout.
    pub fn succeeded(log: impl Into<String>) -> Self {
        Self {
            phase: PodPhase::Succeeded,
            message: None,
            exit_code: Some(0),
            log: Some(log.into()),
        }
    }

    /// A failed status with a non-zero exit code.
    pub fn failed(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            phase: PodPhase::Failed,
            message: Some(message.into()),
            exit_code: Some(exit_code),
            log: None,
        }
    }
}

/// A short-lived compute pod executing one quantum circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl ExecutionPod {
    /// The `(namespace, name)` key of this pod.
    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }
}
