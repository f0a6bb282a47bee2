//! Scripts: versioned text content with an ordered chain of included scripts.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use afs_graph::{DependencyError, OrderedDependencyManager};
use afs_storage::{AppStorage, ListenerHandle, NodeEventList, StorageListener, Topic};
use afs_types::{NodeId, NodeInfo, NodeMetadata};

use crate::error::{ScriptError, ScriptResult};
use crate::project_file::ProjectFile;

/// Pseudo-class of script nodes.
pub const SCRIPT_PSEUDO_CLASS: &str = "script";
/// Relation holding the included scripts.
pub const INCLUDED_SCRIPTS: &str = "scriptIncludes";
/// Binary stream holding the script text.
pub const SCRIPT_CONTENT: &str = "scriptContent";

const SCRIPT_TYPE_KEY: &str = "scriptType";
const SCRIPT_VERSION: u32 = 0;
const SCRIPTS_DELIMITER: &str = "\n\n";

/// Language of a script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    Groovy,
    Python,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groovy => "GROOVY",
            Self::Python => "PYTHON",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptKind {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GROOVY" => Ok(Self::Groovy),
            "PYTHON" => Ok(Self::Python),
            other => Err(ScriptError::UnknownScriptKind(other.to_string())),
        }
    }
}

/// Notified when a script's own content is rewritten.
pub trait ScriptListener: Send + Sync {
    fn script_updated(&self);
}

impl<F> ScriptListener for F
where
    F: Fn() + Send + Sync,
{
    fn script_updated(&self) {
        self()
    }
}

/// Handle returned by [`StorableScript::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptListenerId(u64);

/// Something whose text is stored in the file system.
pub trait StorableScript {
    /// The script text. With `with_includes`, the expanded text of every
    /// included script comes first, in include order.
    fn read_script(&self, with_includes: bool) -> ScriptResult<String>;

    /// This script's own text, without includes.
    fn read_own_script(&self) -> ScriptResult<String>;

    /// Replace the script text.
    fn write_script(&self, content: &str) -> ScriptResult<()>;

    fn add_listener(&self, listener: Arc<dyn ScriptListener>) -> ScriptListenerId;

    /// Returns `true` if the listener was registered.
    fn remove_listener(&self, id: ScriptListenerId) -> bool;
}

type ListenerList = RwLock<Vec<(ScriptListenerId, Arc<dyn ScriptListener>)>>;

/// A script node.
///
/// Listeners added to a script are called once for every delivered update
/// of this script's own content stream. Updates of included scripts do not
/// reach them; those propagate as invalidations instead.
pub struct Script {
    file: ProjectFile,
    kind: ScriptKind,
    dependencies: OrderedDependencyManager,
    listeners: Arc<ListenerList>,
    next_listener: AtomicU64,
    subscription: ListenerHandle,
}

impl Script {
    /// Create a script node under `parent` with the given initial text.
    pub fn create(
        storage: Arc<dyn AppStorage>,
        parent: &NodeId,
        name: &str,
        kind: ScriptKind,
        content: &str,
    ) -> ScriptResult<Self> {
        storage.flush()?;
        let metadata = NodeMetadata::new().with_string(SCRIPT_TYPE_KEY, kind.as_str());
        let info = storage.create_node(parent, name, SCRIPT_PSEUDO_CLASS, "", SCRIPT_VERSION, metadata)?;
        write_content(storage.as_ref(), &info.id, content)?;
        storage.flush()?;
        debug!(node = %info.id, name, kind = %kind, "script created");
        Self::from_info(storage, info)
    }

    /// Open an existing script node.
    pub fn open(storage: Arc<dyn AppStorage>, id: &NodeId) -> ScriptResult<Self> {
        let info = storage.get_node_info(id)?;
        Self::from_info(storage, info)
    }

    /// Bind a script to already fetched node info.
    pub fn from_info(storage: Arc<dyn AppStorage>, info: NodeInfo) -> ScriptResult<Self> {
        if !info.is_a(SCRIPT_PSEUDO_CLASS) {
            return Err(ScriptError::NotAScript {
                node: info.id,
                pseudo_class: info.pseudo_class,
            });
        }
        let kind: ScriptKind = info.metadata.get_string(SCRIPT_TYPE_KEY)?.parse()?;

        let id = info.id;
        let listeners: Arc<ListenerList> = Arc::new(RwLock::new(Vec::new()));
        let weak = Arc::downgrade(&listeners);
        let on_events: StorageListener = Arc::new(move |events: &NodeEventList| {
            let Some(listeners) = weak.upgrade() else {
                return;
            };
            for _ in events.iter().filter(|e| e.is_data_update_of(&id, SCRIPT_CONTENT)) {
                let targets: Vec<Arc<dyn ScriptListener>> = listeners
                    .read()
                    .expect("listener lock poisoned")
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect();
                for listener in targets {
                    listener.script_updated();
                }
            }
        });
        let subscription = storage.events_bus().subscribe(Topic::Node(id), on_events);
        let dependencies = OrderedDependencyManager::new(Arc::clone(&storage), id);

        Ok(Self {
            file: ProjectFile::new(info, storage),
            kind,
            dependencies,
            listeners,
            next_listener: AtomicU64::new(1),
            subscription,
        })
    }

    pub fn id(&self) -> &NodeId {
        self.file.id()
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn file(&self) -> &ProjectFile {
        &self.file
    }

    // ---------------------------------------------------------------
    // Includes
    // ---------------------------------------------------------------

    /// Included scripts, in include order.
    pub fn included_scripts(&self) -> ScriptResult<Vec<Script>> {
        let storage = self.file.storage();
        self.dependencies
            .dependencies_of_type(INCLUDED_SCRIPTS, SCRIPT_PSEUDO_CLASS)?
            .into_iter()
            .map(|info| Script::from_info(Arc::clone(storage), info))
            .collect()
    }

    /// Append a script to the include chain.
    ///
    /// Fails with a circular dependency if `include` is this script or
    /// already depends on it.
    pub fn add_script(&self, include: &Script) -> ScriptResult<()> {
        self.flush_pending()?;
        self.dependencies
            .append_dependencies(INCLUDED_SCRIPTS, &[*include.id()])?;
        self.file.invalidate()
    }

    /// Remove a script from the include chain. Absent ids are ignored.
    pub fn remove_script(&self, id: &NodeId) -> ScriptResult<()> {
        self.flush_pending()?;
        self.dependencies.remove_dependencies(INCLUDED_SCRIPTS, &[*id])?;
        self.file.invalidate()
    }

    /// Swap two positions of the include chain.
    pub fn switch_included_dependencies(&self, first: usize, second: usize) -> ScriptResult<()> {
        self.flush_pending()?;
        let ids = self.dependencies.dependency_ids(INCLUDED_SCRIPTS)?;
        let len = ids.len();
        if first >= len || second >= len {
            return Err(ScriptError::IndexOutOfRange { first, second, len });
        }
        let mut reordered = ids;
        reordered.swap(first, second);
        self.dependencies
            .set_dependencies(INCLUDED_SCRIPTS, &reordered)?;
        self.file.invalidate()
    }

    pub fn clear_dependencies_cache(&self) {
        self.dependencies.clear_cache();
    }

    /// Flush changes already pending in the storage, so that a rejected
    /// buffer fails the calling operation before it mutates anything.
    fn flush_pending(&self) -> ScriptResult<()> {
        self.file.storage().flush()?;
        Ok(())
    }

    fn render(&self, with_includes: bool, path: &mut HashSet<NodeId>) -> ScriptResult<String> {
        let own = self.read_own_script()?;
        if !with_includes {
            return Ok(own);
        }
        if !path.insert(*self.id()) {
            return Err(DependencyError::CircularDependency {
                owner: *self.id(),
                target: *self.id(),
            }
            .into());
        }

        let mut parts = Vec::new();
        for include in self.included_scripts()? {
            parts.push(include.render(true, path)?);
        }
        path.remove(self.id());

        let mut text = parts.join(SCRIPTS_DELIMITER);
        if !text.trim().is_empty() {
            text.push_str(SCRIPTS_DELIMITER);
        }
        text.push_str(&own);
        Ok(text)
    }
}

fn write_content(storage: &dyn AppStorage, id: &NodeId, content: &str) -> ScriptResult<()> {
    let mut sink = storage.write_binary_data(id, SCRIPT_CONTENT)?;
    sink.write_all(content.as_bytes())
        .map_err(afs_storage::StorageError::from)?;
    sink.finish()?;
    Ok(())
}

impl StorableScript for Script {
    fn read_script(&self, with_includes: bool) -> ScriptResult<String> {
        self.render(with_includes, &mut HashSet::new())
    }

    fn read_own_script(&self) -> ScriptResult<String> {
        let bytes = self
            .file
            .storage()
            .read_binary_data_to_vec(self.id(), SCRIPT_CONTENT)?
            .ok_or_else(|| ScriptError::ContentNotFound {
                node: *self.id(),
                name: SCRIPT_CONTENT.to_string(),
            })?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Replaces the content, stamps the modification time, flushes, and
    /// invalidates every script including this one.
    fn write_script(&self, content: &str) -> ScriptResult<()> {
        self.flush_pending()?;
        let storage = self.file.storage();
        write_content(storage.as_ref(), self.id(), content)?;
        storage.update_modification_time(self.id())?;
        storage.flush()?;
        debug!(node = %self.id(), len = content.len(), "script written");
        self.file.invalidate()
    }

    fn add_listener(&self, listener: Arc<dyn ScriptListener>) -> ScriptListenerId {
        let id = ScriptListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ScriptListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

impl Drop for Script {
    fn drop(&mut self) {
        self.file
            .storage()
            .events_bus()
            .unsubscribe(self.subscription);
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("id", self.id())
            .field("name", &self.name())
            .field("kind", &self.kind)
            .finish()
    }
}
