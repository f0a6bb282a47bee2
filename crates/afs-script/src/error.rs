use thiserror::Error;

use afs_graph::DependencyError;
use afs_storage::StorageError;
use afs_types::{NodeId, TypeError};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error("one or both indexes values are out of bounds: {first} and {second} for {len} included scripts")]
    IndexOutOfRange { first: usize, second: usize, len: usize },

    #[error("unable to read data '{name}' from node {node}")]
    ContentNotFound { node: NodeId, name: String },

    #[error("node {node} is a '{pseudo_class}', not a script")]
    NotAScript { node: NodeId, pseudo_class: String },

    #[error("unknown script type '{0}'")]
    UnknownScriptKind(String),

    #[error("script content is not valid UTF-8: {0}")]
    InvalidContent(#[from] std::string::FromUtf8Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] TypeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ScriptResult<T> = Result<T, ScriptError>;
