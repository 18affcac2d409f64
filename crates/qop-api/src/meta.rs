//! Object metadata shared by every stored resource.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `(namespace, name)` pair identifying a resource within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    /// Create a new namespaced name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Link from a child resource back to its owning resource.
///
/// Deletion of the owner cascades to every resource that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    /// True when the owner is the managing controller for this resource.
    #[serde(default)]
    pub controller: bool,
}

/// Standard metadata carried by every resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Unique identity of this resource instance, assigned at creation.
    pub uid: Uuid,
    /// Monotonic version used for optimistic-concurrency writes.
    #[serde(default)]
    pub resource_version: u64,
    pub creation_timestamp: DateTime<Utc>,
    /// Set when a delete has been requested but finalizers remain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Create metadata for a new resource.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::new_v4(),
            resource_version: 0,
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
            labels: BTreeMap::new(),
            finalizers: Vec::new(),
            owner_references: Vec::new(),
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an owner reference.
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    /// The `(namespace, name)` key of this resource.
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether a delete has been requested.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Whether the given finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Idempotent.
    pub fn add_finalizer(&mut self, finalizer: impl Into<String>) {
        let finalizer = finalizer.into();
        if !self.has_finalizer(&finalizer) {
            self.finalizers.push(finalizer);
        }
    }

    /// Remove a finalizer. Removing an absent finalizer is a no-op.
    pub fn remove_finalizer(&mut self, finalizer: &str) {
        self.finalizers.retain(|f| f != finalizer);
    }

    /// Whether this resource is owned by the resource with the given uid.
    pub fn owned_by(&self, owner_uid: Uuid) -> bool {
        self.owner_references.iter().any(|r| r.uid == owner_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_name_display() {
        let key = NamespacedName::new("default", "bell-state");
        assert_eq!(key.to_string(), "default/bell-state");
    }

    #[test]
    fn test_finalizer_idempotence() {
        let mut meta = ObjectMeta::new("default", "job-1");

        meta.add_finalizer("quantum.io/finalizer");
        meta.add_finalizer("quantum.io/finalizer");
        assert_eq!(meta.finalizers.len(), 1);

        meta.remove_finalizer("quantum.io/finalizer");
        assert!(meta.finalizers.is_empty());

        // Removing an absent finalizer is a no-op.
        meta.remove_finalizer("quantum.io/finalizer");
        assert!(meta.finalizers.is_empty());
    }

    #[test]
    fn test_owned_by() {
        let owner_uid = Uuid::new_v4();
        let meta = ObjectMeta::new("default", "child").with_owner(OwnerReference {
            api_version: "quantum.quantum.io/v1".to_string(),
            kind: "QiskitJob".to_string(),
            name: "parent".to_string(),
            uid: owner_uid,
            controller: true,
        });

        assert!(meta.owned_by(owner_uid));
        assert!(!meta.owned_by(Uuid::new_v4()));
    }
}
