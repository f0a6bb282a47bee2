//! Error types for dependency relations.

use afs_storage::StorageError;
use afs_types::NodeId;

/// Errors that can occur while editing dependency relations.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    /// The edit would make `owner` reachable from itself.
    #[error("circular dependency: {owner} cannot depend on {target}")]
    CircularDependency {
        /// The node whose relation was being edited.
        owner: NodeId,
        /// The rejected target.
        target: NodeId,
    },

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Convenience alias for dependency results.
pub type DependencyResult<T> = Result<T, DependencyError>;
