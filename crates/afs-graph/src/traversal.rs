//! Reachability queries over stored dependency edges.
//!
//! Every traversal follows edges of any relation name and keeps a visited
//! set, so each node is expanded at most once and shared sub-graphs or
//! pre-existing cycles cannot make it loop.

use std::collections::HashSet;

use afs_storage::{AppStorage, StorageResult};
use afs_types::NodeId;

/// Returns `true` if `to` is reachable from `from` by following one or more
/// dependency edges.
pub fn has_deep_dependency(storage: &dyn AppStorage, from: &NodeId, to: &NodeId) -> StorageResult<bool> {
    let mut visited = HashSet::new();
    visited.insert(*from);
    let mut stack = vec![*from];

    while let Some(current) = stack.pop() {
        for dependency in storage.get_all_dependencies(&current)? {
            let next = dependency.node_info.id;
            if next == *to {
                return Ok(true);
            }
            if visited.insert(next) {
                stack.push(next);
            }
        }
    }
    Ok(false)
}

/// All nodes `id` transitively depends on, in depth-first pre-order.
///
/// The node itself is **not** included.
pub fn dependency_closure(storage: &dyn AppStorage, id: &NodeId) -> StorageResult<Vec<NodeId>> {
    let mut visited = HashSet::new();
    let mut result = Vec::new();
    let mut stack = vec![*id];

    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        if current != *id {
            result.push(current);
        }
        let targets = storage.get_all_dependencies(&current)?;
        // Reverse so the first edge is expanded first.
        for dependency in targets.into_iter().rev() {
            if !visited.contains(&dependency.node_info.id) {
                stack.push(dependency.node_info.id);
            }
        }
    }
    Ok(result)
}

/// All nodes that transitively depend on `id`.
///
/// The node itself is **not** included.
pub fn dependent_closure(storage: &dyn AppStorage, id: &NodeId) -> StorageResult<Vec<NodeId>> {
    let mut visited = HashSet::new();
    visited.insert(*id);
    let mut result = Vec::new();
    let mut stack = vec![*id];

    while let Some(current) = stack.pop() {
        for dependent in storage.get_backward_dependencies(&current)? {
            if visited.insert(dependent.id) {
                result.push(dependent.id);
                stack.push(dependent.id);
            }
        }
    }
    Ok(result)
}
