//! The storage change log: buffered, not-yet-durable time-series mutations.
//!
//! A [`StorageChangeSet`] is an ordered sequence of [`StorageChange`]
//! records. It is the unit of durability and of transport, so it serializes
//! to JSON and parses back to a structurally equal set, record and chunk
//! order included.

use serde::{Deserialize, Serialize};

use afs_timeseries::{DoubleDataChunk, StringDataChunk, TimeSeriesMetadata};
use afs_types::NodeId;

use crate::error::StorageResult;

/// A single buffered mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum StorageChange {
    TimeSeriesCreation {
        node_id: NodeId,
        metadata: TimeSeriesMetadata,
    },
    DoubleTimeSeriesChunksAddition {
        node_id: NodeId,
        version: u32,
        time_series_name: String,
        chunks: Vec<DoubleDataChunk>,
    },
    StringTimeSeriesChunksAddition {
        node_id: NodeId,
        version: u32,
        time_series_name: String,
        chunks: Vec<StringDataChunk>,
    },
}

impl StorageChange {
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::TimeSeriesCreation { node_id, .. }
            | Self::DoubleTimeSeriesChunksAddition { node_id, .. }
            | Self::StringTimeSeriesChunksAddition { node_id, .. } => *node_id,
        }
    }

    /// Name of the series this change touches.
    pub fn time_series_name(&self) -> &str {
        match self {
            Self::TimeSeriesCreation { metadata, .. } => &metadata.name,
            Self::DoubleTimeSeriesChunksAddition {
                time_series_name, ..
            }
            | Self::StringTimeSeriesChunksAddition {
                time_series_name, ..
            } => time_series_name,
        }
    }

    /// Approximate in-memory size, used for buffer thresholds.
    pub fn estimated_size(&self) -> usize {
        match self {
            Self::TimeSeriesCreation { metadata, .. } => {
                64 + metadata.name.len()
                    + metadata
                        .tags
                        .iter()
                        .map(|(k, v)| k.len() + v.len())
                        .sum::<usize>()
            }
            Self::DoubleTimeSeriesChunksAddition { chunks, .. } => {
                chunks.iter().map(DoubleDataChunk::estimated_size).sum()
            }
            Self::StringTimeSeriesChunksAddition { chunks, .. } => {
                chunks.iter().map(StringDataChunk::estimated_size).sum()
            }
        }
    }
}

/// Ordered log of buffered changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageChangeSet {
    changes: Vec<StorageChange>,
}

impl StorageChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: StorageChange) {
        self.changes.push(change);
    }

    pub fn pop(&mut self) -> Option<StorageChange> {
        self.changes.pop()
    }

    pub fn changes(&self) -> &[StorageChange] {
        &self.changes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StorageChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Append every change of `other` after the changes of `self`.
    pub fn extend(&mut self, other: StorageChangeSet) {
        self.changes.extend(other.changes);
    }

    pub fn estimated_size(&self) -> usize {
        self.changes.iter().map(StorageChange::estimated_size).sum()
    }

    /// Serialize to the JSON wire format (an array of tagged records).
    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire format.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> StorageResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<Vec<StorageChange>> for StorageChangeSet {
    fn from(changes: Vec<StorageChange>) -> Self {
        Self { changes }
    }
}

impl IntoIterator for StorageChangeSet {
    type Item = StorageChange;
    type IntoIter = std::vec::IntoIter<StorageChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a> IntoIterator for &'a StorageChangeSet {
    type Item = &'a StorageChange;
    type IntoIter = std::slice::Iter<'a, StorageChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
