//! Job record store for the quantum job control plane.
//!
//! Provides the [`ClusterStore`] contract the reconciliation engine is
//! written against (typed reads, optimistic-concurrency status writes,
//! owner-filtered lists, watch streams, finalizer-aware deletion), the
//! child resource kinds the engine materializes per job (execution pods
//! and config objects), and an in-memory implementation.

pub mod config_object;
pub mod error;
pub mod memory;
pub mod pod;
pub mod store;

pub use config_object::ConfigObject;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pod::{
    ConfigVolume, Container, EnvVar, ExecutionPod, PodPhase, PodResources, PodSpec, PodStatus,
    RestartPolicy, SecurityContext, VolumeMount,
};
pub use store::{ClusterStore, EventType, ResourceKind, WatchEvent, WatchStream};
