//! Phase-based reconciliation engine for quantum jobs.
//!
//! This crate owns the lifecycle of every persisted `QiskitJob`: it drives
//! each job through `Pending → Validating → Scheduling → Running →
//! Completed` (with bounded retries through `Failed → Retrying`),
//! materializes one isolated execution workload per running job, collects
//! and persists results, and guarantees cleanup on deletion through a
//! finalizer guard. Every pass is idempotent under at-least-once event
//! delivery.
//!
//! # Components
//!
//! | Component | Module |
//! |-----------|--------|
//! | Phase engine | [`reconciler::Reconciler`] |
//! | Child workload ownership | [`workload::WorkloadManager`] |
//! | Circuit analysis client | [`validation::ValidationClient`] |
//! | Backend capability boundary | [`backend::BackendAdapter`], [`selector::BackendSelector`] |
//! | Result document sinks | [`persister::ResultPersister`] |
//! | Deletion guard protocol | [`finalizer::FinalizerCoordinator`] |
//! | Keyed, per-key-serialized event loop | [`queue::WorkQueue`], [`controller::Controller`] |

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod persister;
pub mod queue;
pub mod reconciler;
pub mod selector;
pub mod validation;
pub mod workload;

pub use backend::{BackendAdapter, BackendTelemetry, CostEstimate, LocalSimulatorAdapter};
pub use config::{Config, EngineConfig, LoggingConfig};
pub use controller::Controller;
pub use error::{EngineError, EngineResult};
pub use finalizer::{FinalizerCoordinator, FINALIZER};
pub use persister::{ResultDocument, ResultPersister, ResultSink};
pub use queue::WorkQueue;
pub use reconciler::{ReconcileAction, Reconciler};
pub use selector::{BackendSelector, Selection};
pub use validation::{CircuitValidator, ValidationClient, ValidationRequest, ValidationResponse};
pub use workload::{EnsureOutcome, WorkloadManager};
