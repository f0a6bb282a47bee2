//! Dependency relations for the application file system (AFS).
//!
//! A node can depend on other nodes through named relations (for example,
//! the scripts it includes). Each relation is an ordered list of targets:
//! the order is meaningful and survives appends, removals and reorders.
//!
//! # Key Types
//!
//! - [`OrderedDependencyManager`] -- edits and resolves one node's relations
//! - [`DependencyError`] -- cycle rejection and storage failures
//!
//! # Invariants
//!
//! 1. A node never depends on itself.
//! 2. An edit never makes a node reachable from itself, whatever relation
//!    names the path goes through ([`has_deep_dependency`]).
//! 3. A rejected edit leaves the stored edges unchanged.

pub mod error;
pub mod manager;
pub mod traversal;

pub use error::{DependencyError, DependencyResult};
pub use manager::OrderedDependencyManager;
pub use traversal::{dependency_closure, dependent_closure, has_deep_dependency};
