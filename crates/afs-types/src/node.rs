use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::metadata::NodeMetadata;

/// Wall-clock milliseconds since UNIX epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Descriptive attributes of a stored node.
///
/// A `NodeInfo` is a snapshot: the storage backend owns the node, callers
/// hold its id and re-read the info when they need fresh values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    /// Type discriminator (e.g. `"folder"`, `"script"`).
    pub pseudo_class: String,
    pub description: String,
    pub creation_time: i64,
    pub modification_time: i64,
    pub version: u32,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl NodeInfo {
    /// Create info for a brand-new node, stamped with the current time.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        pseudo_class: impl Into<String>,
        description: impl Into<String>,
        version: u32,
        metadata: NodeMetadata,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            name: name.into(),
            pseudo_class: pseudo_class.into(),
            description: description.into(),
            creation_time: now,
            modification_time: now,
            version,
            metadata,
        }
    }

    /// Returns `true` if this node has the given pseudo-class.
    pub fn is_a(&self, pseudo_class: &str) -> bool {
        self.pseudo_class == pseudo_class
    }
}

/// A named dependency edge, as reported by storage: the edge name plus the
/// info of the node it points to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDependency {
    pub name: String,
    pub node_info: NodeInfo,
}

impl NodeDependency {
    pub fn new(name: impl Into<String>, node_info: NodeInfo) -> Self {
        Self {
            name: name.into(),
            node_info,
        }
    }
}
