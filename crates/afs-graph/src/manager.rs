//! Ordered, named dependency relations of one owning node.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use afs_storage::{AppStorage, ListenerHandle, NodeEvent, NodeEventList, StorageListener, Topic};
use afs_types::{NodeId, NodeInfo};

use crate::error::{DependencyError, DependencyResult};
use crate::traversal::has_deep_dependency;

type ResolutionCache = Mutex<HashMap<String, Vec<NodeInfo>>>;

/// Manages the ordered dependency relations of one node.
///
/// Edges are persisted in the storage, which keeps them in insertion order
/// per relation. Resolved targets are cached per relation until the cache is
/// cleared, either explicitly or when the storage delivers a dependency
/// change or [`NodeEvent::NodeInvalidated`] for the owner. Content changes
/// of the targets never clear the cache.
///
/// Edits to one owner's relations must come from one logical writer at a
/// time; concurrent reads are safe.
pub struct OrderedDependencyManager {
    storage: Arc<dyn AppStorage>,
    owner: NodeId,
    cache: Arc<ResolutionCache>,
    subscription: ListenerHandle,
}

impl OrderedDependencyManager {
    /// Create a manager for `owner` and subscribe it to the owner's events.
    pub fn new(storage: Arc<dyn AppStorage>, owner: NodeId) -> Self {
        let cache: Arc<ResolutionCache> = Arc::new(Mutex::new(HashMap::new()));
        let weak = Arc::downgrade(&cache);
        let listener: StorageListener = Arc::new(move |events: &NodeEventList| {
            if events.iter().any(clears_cache) {
                if let Some(cache) = weak.upgrade() {
                    cache.lock().expect("cache lock poisoned").clear();
                }
            }
        });
        let subscription = storage.events_bus().subscribe(Topic::Node(owner), listener);

        Self {
            storage,
            owner,
            cache,
            subscription,
        }
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    pub fn storage(&self) -> &Arc<dyn AppStorage> {
        &self.storage
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    /// Append targets to a relation, in argument order.
    ///
    /// Every target is checked first: a target equal to the owner, or one
    /// from which the owner is already reachable through edges of any
    /// relation, fails with [`DependencyError::CircularDependency`] and
    /// nothing is appended. Targets already in the relation keep their
    /// position. If the storage rejects an edge, the edges added by this call
    /// are removed again before the error is returned.
    pub fn append_dependencies(&self, relation: &str, targets: &[NodeId]) -> DependencyResult<()> {
        for target in targets {
            self.check_not_circular(target)?;
        }
        let mut present: HashSet<NodeId> = self
            .storage
            .get_dependencies(&self.owner, relation)?
            .into_iter()
            .map(|info| info.id)
            .collect();
        let mut added = Vec::with_capacity(targets.len());
        for target in targets {
            if let Err(e) = self.storage.add_dependency(&self.owner, relation, target) {
                self.roll_back(relation, &added);
                return Err(e.into());
            }
            if present.insert(*target) {
                added.push(*target);
            }
        }
        self.invalidate(relation);
        debug!(owner = %self.owner, relation, count = targets.len(), "appended dependencies");
        Ok(())
    }

    /// Remove targets from a relation. Absent targets are ignored and the
    /// survivors keep their relative order.
    pub fn remove_dependencies(&self, relation: &str, targets: &[NodeId]) -> DependencyResult<()> {
        for target in targets {
            self.storage.remove_dependency(&self.owner, relation, target)?;
        }
        self.invalidate(relation);
        debug!(owner = %self.owner, relation, count = targets.len(), "removed dependencies");
        Ok(())
    }

    /// Replace a relation wholesale with `targets`, in that order.
    ///
    /// Meant for reordering an already valid relation, so the cycle check is
    /// not run again.
    pub fn set_dependencies(&self, relation: &str, targets: &[NodeId]) -> DependencyResult<()> {
        self.storage.set_dependencies(&self.owner, relation, targets)?;
        self.invalidate(relation);
        debug!(owner = %self.owner, relation, count = targets.len(), "set dependencies");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Resolved targets of a relation, in order. Served from the cache when
    /// possible.
    pub fn get_dependencies(&self, relation: &str) -> DependencyResult<Vec<NodeInfo>> {
        if let Some(cached) = self.cache.lock().expect("cache lock poisoned").get(relation) {
            return Ok(cached.clone());
        }
        let resolved = self.storage.get_dependencies(&self.owner, relation)?;
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .insert(relation.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Targets of a relation having the given pseudo-class, in order.
    pub fn dependencies_of_type(&self, relation: &str, pseudo_class: &str) -> DependencyResult<Vec<NodeInfo>> {
        Ok(self
            .get_dependencies(relation)?
            .into_iter()
            .filter(|info| info.is_a(pseudo_class))
            .collect())
    }

    /// Map the targets of a relation to entities, keeping the ones `resolve`
    /// accepts, in order.
    pub fn resolve_dependencies<T>(
        &self,
        relation: &str,
        resolve: impl FnMut(NodeInfo) -> Option<T>,
    ) -> DependencyResult<Vec<T>> {
        Ok(self
            .get_dependencies(relation)?
            .into_iter()
            .filter_map(resolve)
            .collect())
    }

    /// Ids of a relation's targets, in order.
    pub fn dependency_ids(&self, relation: &str) -> DependencyResult<Vec<NodeId>> {
        Ok(self
            .get_dependencies(relation)?
            .into_iter()
            .map(|info| info.id)
            .collect())
    }

    /// Returns `true` if a resolution for the relation is cached.
    pub fn is_cached(&self, relation: &str) -> bool {
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .contains_key(relation)
    }

    /// Drop every cached resolution.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("cache lock poisoned").clear();
    }

    fn invalidate(&self, relation: &str) {
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .remove(relation);
    }

    fn roll_back(&self, relation: &str, added: &[NodeId]) {
        for target in added {
            if let Err(e) = self.storage.remove_dependency(&self.owner, relation, target) {
                warn!(owner = %self.owner, relation, target = %target, error = %e, "failed to roll back dependency");
            }
        }
        self.invalidate(relation);
    }

    fn check_not_circular(&self, target: &NodeId) -> DependencyResult<()> {
        if *target == self.owner || has_deep_dependency(self.storage.as_ref(), target, &self.owner)? {
            return Err(DependencyError::CircularDependency {
                owner: self.owner,
                target: *target,
            });
        }
        Ok(())
    }
}

fn clears_cache(event: &NodeEvent) -> bool {
    matches!(
        event,
        NodeEvent::DependencyAdded { .. }
            | NodeEvent::DependencyRemoved { .. }
            | NodeEvent::NodeInvalidated { .. }
    )
}

impl Drop for OrderedDependencyManager {
    fn drop(&mut self) {
        self.storage.events_bus().unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for OrderedDependencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedDependencyManager")
            .field("owner", &self.owner)
            .field("storage", &self.storage.file_system_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_storage::{InMemoryAppStorage, StorageError};
    use afs_types::NodeMetadata;
    use proptest::prelude::*;
    use std::io::Write;

    const REL: &str = "includes";

    fn setup(count: usize) -> (Arc<dyn AppStorage>, Vec<NodeId>) {
        let storage: Arc<dyn AppStorage> = Arc::new(InMemoryAppStorage::new("mem"));
        let root = storage.create_root_node_if_not_exists("root", "folder").unwrap();
        let ids = (0..count)
            .map(|i| {
                storage
                    .create_node(&root.id, &format!("n{i}"), "node", "", 0, NodeMetadata::new())
                    .unwrap()
                    .id
            })
            .collect();
        (storage, ids)
    }

    // ---------------------------------------------------------------
    // Cycle rejection
    // ---------------------------------------------------------------

    #[test]
    fn self_dependency_rejected() {
        let (storage, n) = setup(1);
        let manager = OrderedDependencyManager::new(storage, n[0]);
        let err = manager.append_dependencies(REL, &[n[0]]).unwrap_err();
        assert!(matches!(
            err,
            DependencyError::CircularDependency { owner, target } if owner == n[0] && target == n[0]
        ));
        assert!(manager.get_dependencies(REL).unwrap().is_empty());
    }

    #[test]
    fn direct_cycle_rejected_and_graph_unchanged() {
        let (storage, n) = setup(2);
        let a = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        let b = OrderedDependencyManager::new(Arc::clone(&storage), n[1]);
        a.append_dependencies(REL, &[n[1]]).unwrap();

        assert!(matches!(
            b.append_dependencies(REL, &[n[0]]),
            Err(DependencyError::CircularDependency { .. })
        ));
        assert!(storage.get_all_dependencies(&n[1]).unwrap().is_empty());
    }

    #[test]
    fn cycle_through_other_relation_rejected() {
        let (storage, n) = setup(3);
        let a = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        let b = OrderedDependencyManager::new(Arc::clone(&storage), n[1]);
        let c = OrderedDependencyManager::new(Arc::clone(&storage), n[2]);
        a.append_dependencies("data", &[n[1]]).unwrap();
        b.append_dependencies(REL, &[n[2]]).unwrap();

        assert!(matches!(
            c.append_dependencies(REL, &[n[0]]),
            Err(DependencyError::CircularDependency { .. })
        ));
    }

    #[test]
    fn unknown_target_appends_nothing() {
        let (storage, n) = setup(3);
        let a = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        a.append_dependencies(REL, &[n[1]]).unwrap();

        let err = a.append_dependencies(REL, &[n[2], NodeId::new()]).unwrap_err();
        assert!(matches!(err, DependencyError::Storage(StorageError::NodeNotFound(_))));
        assert_eq!(a.dependency_ids(REL).unwrap(), vec![n[1]]);
    }

    #[test]
    fn one_bad_target_appends_nothing() {
        let (storage, n) = setup(3);
        let a = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        assert!(a.append_dependencies(REL, &[n[1], n[0], n[2]]).is_err());
        assert!(a.get_dependencies(REL).unwrap().is_empty());
    }

    // ---------------------------------------------------------------
    // Ordering
    // ---------------------------------------------------------------

    #[test]
    fn append_remove_swap_keep_order() {
        let (storage, n) = setup(4);
        let manager = OrderedDependencyManager::new(storage, n[0]);
        let (x, y, z) = (n[1], n[2], n[3]);

        manager.append_dependencies(REL, &[x, y, z]).unwrap();
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![x, y, z]);

        manager.remove_dependencies(REL, &[y]).unwrap();
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![x, z]);

        manager.set_dependencies(REL, &[z, x]).unwrap();
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![z, x]);
    }

    #[test]
    fn removing_absent_target_is_noop() {
        let (storage, n) = setup(3);
        let manager = OrderedDependencyManager::new(storage, n[0]);
        manager.append_dependencies(REL, &[n[1]]).unwrap();
        manager.remove_dependencies(REL, &[n[2]]).unwrap();
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![n[1]]);
    }

    #[test]
    fn relations_are_independent() {
        let (storage, n) = setup(3);
        let manager = OrderedDependencyManager::new(storage, n[0]);
        manager.append_dependencies("a", &[n[1]]).unwrap();
        manager.append_dependencies("b", &[n[2]]).unwrap();
        assert_eq!(manager.dependency_ids("a").unwrap(), vec![n[1]]);
        assert_eq!(manager.dependency_ids("b").unwrap(), vec![n[2]]);
    }

    #[test]
    fn type_filtering() {
        let (storage, n) = setup(2);
        let root = storage.create_root_node_if_not_exists("root", "folder").unwrap();
        let script = storage
            .create_node(&root.id, "s", "script", "", 0, NodeMetadata::new())
            .unwrap();
        let manager = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        manager.append_dependencies(REL, &[n[1], script.id]).unwrap();

        let scripts = manager.dependencies_of_type(REL, "script").unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].id, script.id);

        let names = manager
            .resolve_dependencies(REL, |info| info.is_a("node").then_some(info.name))
            .unwrap();
        assert_eq!(names, vec!["n1"]);
    }

    // ---------------------------------------------------------------
    // Cache
    // ---------------------------------------------------------------

    #[test]
    fn reads_populate_cache_and_edits_invalidate() {
        let (storage, n) = setup(3);
        let manager = OrderedDependencyManager::new(storage, n[0]);
        manager.append_dependencies(REL, &[n[1]]).unwrap();
        assert!(!manager.is_cached(REL));

        manager.get_dependencies(REL).unwrap();
        assert!(manager.is_cached(REL));

        manager.append_dependencies(REL, &[n[2]]).unwrap();
        assert!(!manager.is_cached(REL));
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![n[1], n[2]]);

        manager.clear_cache();
        assert!(!manager.is_cached(REL));
    }

    #[test]
    fn cache_serves_stale_data_until_invalidated() {
        let (storage, n) = setup(3);
        let manager = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        manager.append_dependencies(REL, &[n[1]]).unwrap();
        storage.flush().unwrap();
        manager.get_dependencies(REL).unwrap();

        // Edit behind the manager's back; events are pending until flush.
        storage.add_dependency(&n[0], REL, &n[2]).unwrap();
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![n[1]]);

        storage.flush().unwrap();
        assert!(!manager.is_cached(REL));
        assert_eq!(manager.dependency_ids(REL).unwrap(), vec![n[1], n[2]]);
    }

    #[test]
    fn invalidation_event_clears_cache() {
        let (storage, n) = setup(2);
        let manager = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        manager.append_dependencies(REL, &[n[1]]).unwrap();
        storage.flush().unwrap();
        manager.get_dependencies(REL).unwrap();

        storage.events_bus().push_event(NodeEvent::NodeInvalidated { id: n[1] });
        storage.flush().unwrap();
        assert!(manager.is_cached(REL));

        storage.events_bus().push_event(NodeEvent::NodeInvalidated { id: n[0] });
        storage.flush().unwrap();
        assert!(!manager.is_cached(REL));
    }

    #[test]
    fn target_content_change_keeps_cache() {
        let (storage, n) = setup(2);
        let manager = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        manager.append_dependencies(REL, &[n[1]]).unwrap();
        storage.flush().unwrap();
        manager.get_dependencies(REL).unwrap();

        let mut sink = storage.write_binary_data(&n[1], "content").unwrap();
        sink.write_all(b"x").unwrap();
        sink.finish().unwrap();
        storage.flush().unwrap();
        assert!(manager.is_cached(REL));
    }

    #[test]
    fn drop_unsubscribes() {
        let (storage, n) = setup(1);
        let before = storage.events_bus().subscriber_count();
        let manager = OrderedDependencyManager::new(Arc::clone(&storage), n[0]);
        assert_eq!(storage.events_bus().subscriber_count(), before + 1);
        drop(manager);
        assert_eq!(storage.events_bus().subscriber_count(), before);
    }

    proptest! {
        #[test]
        fn appended_order_is_read_back(order in Just((1..6usize).collect::<Vec<_>>()).prop_shuffle()) {
            let (storage, n) = setup(6);
            let manager = OrderedDependencyManager::new(storage, n[0]);
            let targets: Vec<NodeId> = order.iter().map(|i| n[*i]).collect();
            for target in &targets {
                manager.append_dependencies(REL, &[*target]).unwrap();
            }
            prop_assert_eq!(manager.dependency_ids(REL).unwrap(), targets.clone());

            let mut reversed = targets.clone();
            reversed.reverse();
            manager.set_dependencies(REL, &reversed).unwrap();
            prop_assert_eq!(manager.dependency_ids(REL).unwrap(), reversed);
        }
    }
}
