use std::io::{Read, Write};

use afs_timeseries::{DoubleDataChunk, StringDataChunk, TimeSeriesMetadata};
use afs_types::{NodeDependency, NodeId, NodeInfo, NodeMetadata};

use crate::error::StorageResult;
use crate::events::EventsBus;

/// Writable destination for a binary data stream.
///
/// Bytes written to the sink replace the stream's content only once
/// [`finish`](Self::finish) succeeds. Dropping an unfinished sink discards
/// everything written to it and leaves the previous content in place.
pub trait BinarySink: Write + Send {
    /// Commit the written bytes as the new content of the stream.
    fn finish(self: Box<Self>) -> StorageResult<()>;
}

/// The storage contract of an application file system.
///
/// All implementations must satisfy these invariants:
/// - Node ids are never reused.
/// - Child names are unique under one parent.
/// - Dependency edges are kept in insertion order per (node, name) pair, and
///   adding an edge that already exists is a no-op.
/// - Time-series writes are buffered and become visible after
///   [`flush`](Self::flush); a failed flush applies none of the buffered
///   changes.
/// - Every mutation pushes its [`NodeEvent`](crate::NodeEvent)s onto
///   [`events_bus`](Self::events_bus); `flush` delivers them.
/// - I/O and serialization errors are propagated, never silently ignored.
pub trait AppStorage: Send + Sync {
    /// Name of this file system.
    fn file_system_name(&self) -> &str;

    // -----------------------------------------------------------------------
    // Node tree
    // -----------------------------------------------------------------------

    /// Return the root node, creating it on first call.
    fn create_root_node_if_not_exists(&self, name: &str, pseudo_class: &str) -> StorageResult<NodeInfo>;

    fn create_node(
        &self,
        parent: &NodeId,
        name: &str,
        pseudo_class: &str,
        description: &str,
        version: u32,
        metadata: NodeMetadata,
    ) -> StorageResult<NodeInfo>;

    fn get_node_info(&self, id: &NodeId) -> StorageResult<NodeInfo>;

    /// Children of a node, ordered by name.
    fn get_child_nodes(&self, id: &NodeId) -> StorageResult<Vec<NodeInfo>>;

    fn get_child_node(&self, parent: &NodeId, name: &str) -> StorageResult<Option<NodeInfo>>;

    /// Parent of a node; `None` for the root.
    fn get_parent_node(&self, id: &NodeId) -> StorageResult<Option<NodeInfo>>;

    fn rename_node(&self, id: &NodeId, name: &str) -> StorageResult<()>;

    fn set_description(&self, id: &NodeId, description: &str) -> StorageResult<()>;

    fn set_metadata(&self, id: &NodeId, metadata: NodeMetadata) -> StorageResult<()>;

    /// Stamp the node's modification time with the current time.
    fn update_modification_time(&self, id: &NodeId) -> StorageResult<()>;

    /// Delete a node and its whole subtree, including every dependency edge
    /// that touches a deleted node. Returns the parent id.
    fn delete_node(&self, id: &NodeId) -> StorageResult<Option<NodeId>>;

    // -----------------------------------------------------------------------
    // Binary data
    // -----------------------------------------------------------------------

    /// Open a named stream for reading.
    ///
    /// Returns `Ok(None)` if the stream does not exist, `Err` on I/O failure.
    fn read_binary_data(&self, id: &NodeId, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>>;

    /// Open a named stream for writing. See [`BinarySink`].
    fn write_binary_data(&self, id: &NodeId, name: &str) -> StorageResult<Box<dyn BinarySink>>;

    /// Names of the node's binary streams, sorted.
    fn get_data_names(&self, id: &NodeId) -> StorageResult<Vec<String>>;

    fn data_exists(&self, id: &NodeId, name: &str) -> StorageResult<bool>;

    /// Remove a stream. Returns `true` if it existed.
    fn remove_data(&self, id: &NodeId, name: &str) -> StorageResult<bool>;

    /// Read a whole stream into memory.
    ///
    /// Default implementation drains [`read_binary_data`](Self::read_binary_data).
    fn read_binary_data_to_vec(&self, id: &NodeId, name: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.read_binary_data(id, name)? {
            Some(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Dependencies
    // -----------------------------------------------------------------------

    fn add_dependency(&self, id: &NodeId, name: &str, to: &NodeId) -> StorageResult<()>;

    /// Targets of the node's edges with this name, in insertion order.
    fn get_dependencies(&self, id: &NodeId, name: &str) -> StorageResult<Vec<NodeInfo>>;

    /// Every outgoing edge of the node, in insertion order.
    fn get_all_dependencies(&self, id: &NodeId) -> StorageResult<Vec<NodeDependency>>;

    /// Nodes having at least one edge pointing to this node.
    fn get_backward_dependencies(&self, id: &NodeId) -> StorageResult<Vec<NodeInfo>>;

    /// Remove one edge. Removing an absent edge is a no-op.
    fn remove_dependency(&self, id: &NodeId, name: &str, to: &NodeId) -> StorageResult<()>;

    /// Replace the node's edges with this name by `targets`, in that order.
    ///
    /// Default implementation removes every edge and adds them back. Backends
    /// may override to keep the identity of edges that survive.
    fn set_dependencies(&self, id: &NodeId, name: &str, targets: &[NodeId]) -> StorageResult<()> {
        for dependency in self.get_dependencies(id, name)? {
            self.remove_dependency(id, name, &dependency.id)?;
        }
        for target in targets {
            self.add_dependency(id, name, target)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Time series
    // -----------------------------------------------------------------------

    /// Buffer the creation of a series.
    fn create_time_series(&self, id: &NodeId, metadata: TimeSeriesMetadata) -> StorageResult<()>;

    /// Names of the node's series, sorted.
    fn get_time_series_names(&self, id: &NodeId) -> StorageResult<Vec<String>>;

    fn time_series_exists(&self, id: &NodeId, name: &str) -> StorageResult<bool>;

    fn get_time_series_metadata(&self, id: &NodeId, name: &str) -> StorageResult<TimeSeriesMetadata>;

    /// Versions holding at least one chunk, ascending.
    fn get_time_series_data_versions(&self, id: &NodeId, name: &str) -> StorageResult<Vec<u32>>;

    /// Buffer the addition of double chunks to one version of a series.
    fn add_double_time_series_data(
        &self,
        id: &NodeId,
        version: u32,
        name: &str,
        chunks: Vec<DoubleDataChunk>,
    ) -> StorageResult<()>;

    /// Buffer the addition of string chunks to one version of a series.
    fn add_string_time_series_data(
        &self,
        id: &NodeId,
        version: u32,
        name: &str,
        chunks: Vec<StringDataChunk>,
    ) -> StorageResult<()>;

    /// Chunks of one version, ordered by offset.
    fn get_double_time_series_data(&self, id: &NodeId, version: u32, name: &str) -> StorageResult<Vec<DoubleDataChunk>>;

    /// Chunks of one version, ordered by offset.
    fn get_string_time_series_data(&self, id: &NodeId, version: u32, name: &str) -> StorageResult<Vec<StringDataChunk>>;

    /// Drop every series of the node.
    fn clear_time_series(&self, id: &NodeId) -> StorageResult<()>;

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// The event bus owned by this storage.
    fn events_bus(&self) -> &EventsBus;

    /// Make every buffered change durable, then deliver pending events.
    fn flush(&self) -> StorageResult<()>;

    /// Flush, then refuse further mutations.
    fn close(&self) -> StorageResult<()>;
}
