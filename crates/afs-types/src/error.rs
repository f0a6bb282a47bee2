use thiserror::Error;

use crate::metadata::MetadataKind;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("{kind} metadata '{key}' not found")]
    MetadataNotFound { kind: MetadataKind, key: String },

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
}
