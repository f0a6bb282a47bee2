use std::sync::Arc;

use tracing::debug;

use afs_graph::{dependent_closure, has_deep_dependency};
use afs_storage::{AppStorage, NodeEvent};
use afs_types::{NodeId, NodeInfo};

use crate::error::ScriptResult;

/// A node of a project, bound to the storage holding it.
///
/// The file keeps the node's info as it was when the file was opened; call
/// [`refresh_info`](Self::refresh_info) for current values.
pub struct ProjectFile {
    info: NodeInfo,
    storage: Arc<dyn AppStorage>,
}

impl ProjectFile {
    pub fn new(info: NodeInfo, storage: Arc<dyn AppStorage>) -> Self {
        Self { info, storage }
    }

    pub fn id(&self) -> &NodeId {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn storage(&self) -> &Arc<dyn AppStorage> {
        &self.storage
    }

    /// Re-read the node's info from storage.
    pub fn refresh_info(&self) -> ScriptResult<NodeInfo> {
        Ok(self.storage.get_node_info(self.id())?)
    }

    /// Nodes with an edge pointing to this file.
    pub fn backward_dependencies(&self) -> ScriptResult<Vec<NodeInfo>> {
        Ok(self.storage.get_backward_dependencies(self.id())?)
    }

    /// Returns `true` if `other` is reachable from this file through
    /// dependency edges of any relation.
    pub fn has_deep_dependency(&self, other: &NodeId) -> ScriptResult<bool> {
        Ok(has_deep_dependency(self.storage.as_ref(), self.id(), other)?)
    }

    /// Tell every node that transitively depends on this file that its
    /// derived state is stale, then flush so the notices are delivered.
    pub fn invalidate(&self) -> ScriptResult<()> {
        let dependents = dependent_closure(self.storage.as_ref(), self.id())?;
        for id in &dependents {
            self.storage
                .events_bus()
                .push_event(NodeEvent::NodeInvalidated { id: *id });
        }
        debug!(node = %self.id(), dependents = dependents.len(), "invalidated dependents");
        self.storage.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for ProjectFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectFile")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("pseudo_class", &self.info.pseudo_class)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_storage::{InMemoryAppStorage, NodeEventList, Topic};
    use afs_types::NodeMetadata;
    use std::sync::Mutex;

    fn setup(count: usize) -> (Arc<dyn AppStorage>, Vec<NodeInfo>) {
        let storage: Arc<dyn AppStorage> = Arc::new(InMemoryAppStorage::new("mem"));
        let root = storage.create_root_node_if_not_exists("root", "folder").unwrap();
        let infos = (0..count)
            .map(|i| {
                storage
                    .create_node(&root.id, &format!("f{i}"), "file", "", 0, NodeMetadata::new())
                    .unwrap()
            })
            .collect();
        storage.flush().unwrap();
        (storage, infos)
    }

    #[test]
    fn invalidate_reaches_transitive_dependents_only() {
        let (storage, f) = setup(4);
        // f1 -> f0, f2 -> f1; f3 is unrelated
        storage.add_dependency(&f[1].id, "r", &f[0].id).unwrap();
        storage.add_dependency(&f[2].id, "r", &f[1].id).unwrap();
        storage.flush().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        storage.events_bus().subscribe(
            Topic::All,
            Arc::new(move |events: &NodeEventList| {
                sink.lock().unwrap().extend(events.iter().cloned());
            }),
        );

        let file = ProjectFile::new(f[0].clone(), Arc::clone(&storage));
        file.invalidate().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&NodeEvent::NodeInvalidated { id: f[1].id }));
        assert!(seen.contains(&NodeEvent::NodeInvalidated { id: f[2].id }));
    }

    #[test]
    fn deep_dependency_and_backward_dependencies() {
        let (storage, f) = setup(3);
        storage.add_dependency(&f[0].id, "r", &f[1].id).unwrap();
        storage.add_dependency(&f[1].id, "r", &f[2].id).unwrap();

        let file = ProjectFile::new(f[0].clone(), Arc::clone(&storage));
        assert!(file.has_deep_dependency(&f[2].id).unwrap());

        let middle = ProjectFile::new(f[1].clone(), storage);
        let back = middle.backward_dependencies().unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, f[0].id);
    }

    #[test]
    fn refresh_info_sees_renames() {
        let (storage, f) = setup(1);
        let file = ProjectFile::new(f[0].clone(), Arc::clone(&storage));
        storage.rename_node(file.id(), "renamed").unwrap();
        assert_eq!(file.name(), "f0");
        assert_eq!(file.refresh_info().unwrap().name, "renamed");
    }
}
