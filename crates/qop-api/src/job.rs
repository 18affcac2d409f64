//! The `QiskitJob` resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{NamespacedName, ObjectMeta, OwnerReference};
use crate::spec::JobSpec;
use crate::status::JobStatus;

/// API group of the declared resource.
pub const API_GROUP: &str = "quantum.quantum.io";

/// Fully qualified API version.
pub const API_VERSION: &str = "quantum.quantum.io/v1";

/// Resource kind.
pub const KIND: &str = "QiskitJob";

/// A user-declared request to execute a quantum circuit.
///
/// `spec` is user-owned and treated as immutable by the engine; `status` is
/// engine-owned and written through the status subresource only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QiskitJob {
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl QiskitJob {
    /// Create a new job with empty status, as a user submission would.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: JobStatus::default(),
        }
    }

    /// The `(namespace, name)` key of this job.
    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }

    /// An owner reference pointing back at this job, for child resources.
    pub fn controller_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid,
            controller: true,
        }
    }

    /// The columns shown on a resource listing: phase, backend, cost, age.
    pub fn printed_columns(&self, now: DateTime<Utc>) -> [String; 4] {
        let phase = self
            .status
            .phase
            .map(|p| p.to_string())
            .unwrap_or_default();
        let backend = self.status.selected_backend.clone().unwrap_or_default();
        let cost = self.status.actual_cost.clone().unwrap_or_default();
        let age = format_age(now - self.metadata.creation_timestamp);
        [phase, backend, cost, age]
    }
}

/// Compact age rendering for listings ("42s", "7m", "3h", "2d").
fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}
