//! String-keyed configuration objects.
//!
//! Used for two things in this control plane: delivering circuit source
//! files into execution pods, and receiving result documents as a sink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use qop_api::{NamespacedName, ObjectMeta};

/// A namespaced map of string data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl ConfigObject {
    /// Create a config object with a single entry.
    pub fn with_entry(
        metadata: ObjectMeta,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert(key.into(), value.into());
        Self { metadata, data }
    }

    /// The `(namespace, name)` key of this object.
    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }
}
