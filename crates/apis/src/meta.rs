//! Object metadata shared by every resource envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata carried by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Opaque identity assigned by the store; stable across updates.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default = "ObjectMeta::epoch")]
    pub creation_timestamp: DateTime<Utc>,
    /// Set by the store when deletion has been requested but finalization
    /// is still pending.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub controller: bool,
}

impl ObjectMeta {
    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    /// Convenience constructor for namespaced objects.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: uuid::Uuid::new_v4().to_string(),
            creation_timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// Convenience constructor for cluster-scoped objects.
    pub fn cluster_scoped(name: &str) -> Self {
        ObjectMeta {
            name: name.to_string(),
            uid: uuid::Uuid::new_v4().to_string(),
            creation_timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// Name of the controlling owner, if any owner reference is present.
    /// The first reference wins, matching how sharding keys are derived.
    pub fn controller_name(&self) -> Option<&str> {
        self.owner_references.first().map(|r| r.name.as_str())
    }

    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}
