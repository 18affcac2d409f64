//! Resource schema for the quantum job control plane.
//!
//! This crate is the declared API of the `quantum.quantum.io/v1:QiskitJob`
//! resource: user-owned spec types, engine-owned status types, and the
//! object metadata every stored resource carries. It is pure data; all
//! behavior lives in the engine.

pub mod job;
pub mod meta;
pub mod spec;
pub mod status;

pub use job::{QiskitJob, API_GROUP, API_VERSION, KIND};
pub use meta::{NamespacedName, ObjectMeta, OwnerReference};
pub use spec::{
    BackendSelectionSpec, BackendSpec, BackendType, BackendWeights, BudgetSpec, CircuitSource,
    CircuitSpec, ConfigMapKeyRef, CredentialsSpec, ExecutionSpec, GitRef, JobPriority, JobSpec,
    OutputSpec, OutputType, ResourceRequirements, ResultFormat, SecretRef, SessionMode,
    SessionSpec, DEFAULT_OPTIMIZATION_LEVEL, DEFAULT_SHOTS, MAX_SHOTS,
};
pub use status::{
    BackendInfo, CircuitMetadata, Condition, ConditionStatus, ExecutionMetrics, JobPhase,
    JobStatus, ResultsInfo,
};
