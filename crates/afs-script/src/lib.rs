//! Project files and scripts for the application file system (AFS).
//!
//! A [`Script`] is a node holding text in its `scriptContent` stream and an
//! ordered chain of included scripts in its `scriptIncludes` relation.
//! Reading a script with includes expands the chain depth-first, joining
//! the parts with a blank line.
//!
//! Writing a script, or editing its include chain, invalidates every node
//! that transitively depends on it (see [`ProjectFile::invalidate`]).
//! Listeners registered on a script hear about rewrites of that script's
//! own content only.

pub mod error;
pub mod project_file;
pub mod script;

pub use error::{ScriptError, ScriptResult};
pub use project_file::ProjectFile;
pub use script::{
    Script, ScriptKind, ScriptListener, ScriptListenerId, StorableScript, INCLUDED_SCRIPTS,
    SCRIPT_CONTENT, SCRIPT_PSEUDO_CLASS,
};
