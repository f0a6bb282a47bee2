use afs_timeseries::{ChunkError, TimeSeriesDataType};
use afs_types::NodeId;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A sibling with the same name already exists under the parent.
    #[error("node {parent} already has a child named '{name}'")]
    DuplicateChildName { parent: NodeId, name: String },

    /// The root node cannot be deleted.
    #[error("cannot delete root node {0}")]
    RootDeletion(NodeId),

    /// The named time series does not exist on the node.
    #[error("time series '{name}' not found on node {node}")]
    TimeSeriesNotFound { node: NodeId, name: String },

    /// A time series with this name already exists on the node.
    #[error("time series '{name}' already exists on node {node}")]
    TimeSeriesAlreadyExists { node: NodeId, name: String },

    /// Chunks of one value type were written to a series of another.
    #[error("time series '{name}' holds {expected} values, got {actual} chunks")]
    DataTypeMismatch {
        name: String,
        expected: TimeSeriesDataType,
        actual: TimeSeriesDataType,
    },

    /// New chunks overlap chunks already stored for the same version.
    #[error("chunk overlap in time series '{name}' version {version} on node {node}: {source}")]
    OverlappingChunk {
        node: NodeId,
        name: String,
        version: u32,
        #[source]
        source: ChunkError,
    },

    /// A chunk or series index is malformed.
    #[error("invalid time-series data: {0}")]
    InvalidChunk(#[from] ChunkError),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid storage configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The storage has been closed.
    #[error("storage is closed")]
    Closed,
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
