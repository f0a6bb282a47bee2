use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use afs_timeseries::{
    check_no_overlap, ChunkError, ChunkValue, DataChunk, DoubleDataChunk, StringDataChunk,
    TimeSeriesDataType, TimeSeriesMetadata,
};
use afs_types::{now_millis, NodeDependency, NodeId, NodeInfo, NodeMetadata};

use crate::buffer::{StorageChangeBuffer, StorageChangeFlusher};
use crate::change::{StorageChange, StorageChangeSet};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::events::{EventsBus, NodeEvent};
use crate::journal::ChangeJournal;
use crate::traits::{AppStorage, BinarySink};

struct NodeEntry {
    info: NodeInfo,
    parent: Option<NodeId>,
    children: BTreeMap<String, NodeId>,
    data: BTreeMap<String, Vec<u8>>,
}

struct Edge {
    from: NodeId,
    name: String,
    to: NodeId,
}

#[derive(Clone)]
enum SeriesData {
    Double(BTreeMap<u32, Vec<DoubleDataChunk>>),
    String(BTreeMap<u32, Vec<StringDataChunk>>),
}

impl SeriesData {
    fn empty(data_type: TimeSeriesDataType) -> Self {
        match data_type {
            TimeSeriesDataType::Double => Self::Double(BTreeMap::new()),
            TimeSeriesDataType::String => Self::String(BTreeMap::new()),
        }
    }

    fn versions(&self) -> Vec<u32> {
        match self {
            Self::Double(versions) => versions.keys().copied().collect(),
            Self::String(versions) => versions.keys().copied().collect(),
        }
    }
}

#[derive(Clone)]
struct Series {
    metadata: TimeSeriesMetadata,
    data: SeriesData,
}

type NodeSeries = BTreeMap<String, Series>;

/// Everything the in-memory backend stores.
///
/// Dependency edges live in an arena; each node keeps ordered lists of the
/// arena slots leaving and entering it.
#[derive(Default)]
struct StorageState {
    root: Option<NodeId>,
    nodes: HashMap<NodeId, NodeEntry>,
    edges: Vec<Option<Edge>>,
    free_slots: Vec<usize>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    series: HashMap<NodeId, NodeSeries>,
}

impl StorageState {
    fn node(&self, id: &NodeId) -> StorageResult<&NodeEntry> {
        self.nodes.get(id).ok_or(StorageError::NodeNotFound(*id))
    }

    fn node_mut(&mut self, id: &NodeId) -> StorageResult<&mut NodeEntry> {
        self.nodes.get_mut(id).ok_or(StorageError::NodeNotFound(*id))
    }

    fn info(&self, id: &NodeId) -> StorageResult<NodeInfo> {
        Ok(self.node(id)?.info.clone())
    }

    fn outgoing_edges<'a>(&'a self, id: &NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|slot| self.edges[*slot].as_ref())
    }

    fn find_edge(&self, from: &NodeId, name: &str, to: &NodeId) -> Option<usize> {
        self.outgoing.get(from)?.iter().copied().find(|slot| {
            self.edges[*slot]
                .as_ref()
                .is_some_and(|e| e.name == name && e.to == *to)
        })
    }

    fn insert_edge(&mut self, edge: Edge) -> usize {
        let (from, to) = (edge.from, edge.to);
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.edges[slot] = Some(edge);
                slot
            }
            None => {
                self.edges.push(Some(edge));
                self.edges.len() - 1
            }
        };
        self.outgoing.entry(from).or_default().push(slot);
        self.incoming.entry(to).or_default().push(slot);
        slot
    }

    fn remove_edge(&mut self, slot: usize) -> Option<Edge> {
        let edge = self.edges.get_mut(slot)?.take()?;
        self.free_slots.push(slot);
        if let Some(slots) = self.outgoing.get_mut(&edge.from) {
            slots.retain(|s| *s != slot);
        }
        if let Some(slots) = self.incoming.get_mut(&edge.to) {
            slots.retain(|s| *s != slot);
        }
        Some(edge)
    }

    /// The node and all its descendants, parents before children.
    fn subtree(&self, id: &NodeId) -> Vec<NodeId> {
        let mut ids = vec![*id];
        let mut i = 0;
        while i < ids.len() {
            if let Some(entry) = self.nodes.get(&ids[i]) {
                ids.extend(entry.children.values().copied());
            }
            i += 1;
        }
        ids
    }

    fn insert_node(&mut self, info: NodeInfo, parent: Option<NodeId>) {
        self.nodes.insert(
            info.id,
            NodeEntry {
                info,
                parent,
                children: BTreeMap::new(),
                data: BTreeMap::new(),
            },
        );
    }

    fn series(&self, id: &NodeId, name: &str) -> StorageResult<&Series> {
        self.node(id)?;
        self.series
            .get(id)
            .and_then(|all| all.get(name))
            .ok_or_else(|| StorageError::TimeSeriesNotFound {
                node: *id,
                name: name.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Change application
// ---------------------------------------------------------------------------

/// Applies flushed change sets to the state, all or nothing.
struct ChangeApplier {
    state: Arc<RwLock<StorageState>>,
    bus: Arc<EventsBus>,
    journal: Option<ChangeJournal>,
}

impl ChangeApplier {
    /// Validate the whole set against a staged copy of the touched nodes'
    /// series, journal it, then commit the staged copy.
    fn apply(&self, changes: &StorageChangeSet, journaled: bool) -> StorageResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let mut staged: HashMap<NodeId, NodeSeries> = HashMap::new();
        let mut events = Vec::with_capacity(changes.len());

        for change in changes {
            let node = change.node_id();
            state.node(&node)?;
            let series = staged
                .entry(node)
                .or_insert_with(|| state.series.get(&node).cloned().unwrap_or_default());

            match change {
                StorageChange::TimeSeriesCreation { metadata, .. } => {
                    metadata.index.validate()?;
                    if series.contains_key(&metadata.name) {
                        return Err(StorageError::TimeSeriesAlreadyExists {
                            node,
                            name: metadata.name.clone(),
                        });
                    }
                    series.insert(
                        metadata.name.clone(),
                        Series {
                            metadata: metadata.clone(),
                            data: SeriesData::empty(metadata.data_type),
                        },
                    );
                    events.push(NodeEvent::TimeSeriesCreated {
                        id: node,
                        time_series_name: metadata.name.clone(),
                    });
                }
                StorageChange::DoubleTimeSeriesChunksAddition {
                    version,
                    time_series_name,
                    chunks,
                    ..
                } => {
                    let target = staged_series(series, node, time_series_name)?;
                    match &mut target.data {
                        SeriesData::Double(versions) => {
                            add_chunks(versions, &target.metadata, node, *version, chunks)?
                        }
                        SeriesData::String(_) => {
                            return Err(type_mismatch(&target.metadata, TimeSeriesDataType::Double))
                        }
                    }
                    events.push(NodeEvent::TimeSeriesDataUpdated {
                        id: node,
                        time_series_name: time_series_name.clone(),
                    });
                }
                StorageChange::StringTimeSeriesChunksAddition {
                    version,
                    time_series_name,
                    chunks,
                    ..
                } => {
                    let target = staged_series(series, node, time_series_name)?;
                    match &mut target.data {
                        SeriesData::String(versions) => {
                            add_chunks(versions, &target.metadata, node, *version, chunks)?
                        }
                        SeriesData::Double(_) => {
                            return Err(type_mismatch(&target.metadata, TimeSeriesDataType::String))
                        }
                    }
                    events.push(NodeEvent::TimeSeriesDataUpdated {
                        id: node,
                        time_series_name: time_series_name.clone(),
                    });
                }
            }
        }

        if journaled {
            if let Some(journal) = &self.journal {
                journal.append(changes)?;
            }
        }

        for (node, series) in staged {
            state.series.insert(node, series);
        }
        drop(state);

        for event in events {
            self.bus.push_event(event);
        }
        Ok(())
    }
}

impl StorageChangeFlusher for ChangeApplier {
    fn flush(&self, changes: &StorageChangeSet) -> StorageResult<()> {
        self.apply(changes, true)
    }
}

fn staged_series<'a>(series: &'a mut NodeSeries, node: NodeId, name: &str) -> StorageResult<&'a mut Series> {
    series
        .get_mut(name)
        .ok_or_else(|| StorageError::TimeSeriesNotFound {
            node,
            name: name.to_string(),
        })
}

fn type_mismatch(metadata: &TimeSeriesMetadata, actual: TimeSeriesDataType) -> StorageError {
    StorageError::DataTypeMismatch {
        name: metadata.name.clone(),
        expected: metadata.data_type,
        actual,
    }
}

/// Layer new chunks onto one version, rejecting overlaps and chunks that
/// run past a finite index.
fn add_chunks<T: ChunkValue>(
    versions: &mut BTreeMap<u32, Vec<DataChunk<T>>>,
    metadata: &TimeSeriesMetadata,
    node: NodeId,
    version: u32,
    chunks: &[DataChunk<T>],
) -> StorageResult<()> {
    if chunks.is_empty() {
        return Ok(());
    }
    let point_count = metadata.index.point_count()?;
    for chunk in chunks {
        chunk.validate()?;
        let end = chunk.end()?;
        if let Some(point_count) = point_count {
            if end > point_count {
                return Err(ChunkError::OutOfIndex {
                    offset: chunk.offset(),
                    end,
                    point_count,
                }
                .into());
            }
        }
    }

    let mut merged = versions.get(&version).cloned().unwrap_or_default();
    merged.extend(chunks.iter().cloned());
    check_no_overlap(&merged).map_err(|source| StorageError::OverlappingChunk {
        node,
        name: metadata.name.clone(),
        version,
        source,
    })?;
    merged.sort_by_key(DataChunk::offset);
    versions.insert(version, merged);
    Ok(())
}

// ---------------------------------------------------------------------------
// Binary sink
// ---------------------------------------------------------------------------

struct MemoryBinarySink {
    state: Arc<RwLock<StorageState>>,
    bus: Arc<EventsBus>,
    node: NodeId,
    name: String,
    bytes: Vec<u8>,
}

impl Write for MemoryBinarySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BinarySink for MemoryBinarySink {
    fn finish(self: Box<Self>) -> StorageResult<()> {
        let sink = *self;
        {
            let mut state = sink.state.write().expect("lock poisoned");
            state
                .node_mut(&sink.node)?
                .data
                .insert(sink.name.clone(), sink.bytes);
        }
        debug!(node = %sink.node, data = %sink.name, "binary data written");
        sink.bus.push_event(NodeEvent::NodeDataUpdated {
            id: sink.node,
            data_name: sink.name,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// In-memory [`AppStorage`] backend.
///
/// Intended for tests and embedding. Node tree, binary streams, edges and
/// time series are held behind one `RwLock`. Time-series writes go through a
/// [`StorageChangeBuffer`]; when a journal is configured, each flushed change
/// set is appended to it before being applied.
pub struct InMemoryAppStorage {
    name: String,
    state: Arc<RwLock<StorageState>>,
    bus: Arc<EventsBus>,
    applier: Arc<ChangeApplier>,
    buffer: StorageChangeBuffer,
    closed: AtomicBool,
}

impl InMemoryAppStorage {
    /// Create an empty storage with default configuration and no journal.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), StorageConfig::default(), None)
    }

    /// Create an empty storage, opening the configured journal if any.
    pub fn with_config(name: impl Into<String>, config: StorageConfig) -> StorageResult<Self> {
        let journal = config
            .journal
            .as_ref()
            .map(ChangeJournal::from_config)
            .transpose()?;
        Ok(Self::build(name.into(), config, journal))
    }

    fn build(name: String, config: StorageConfig, journal: Option<ChangeJournal>) -> Self {
        let state = Arc::new(RwLock::new(StorageState::default()));
        let bus = Arc::new(EventsBus::new());
        let applier = Arc::new(ChangeApplier {
            state: Arc::clone(&state),
            bus: Arc::clone(&bus),
            journal,
        });
        let flusher: Arc<dyn StorageChangeFlusher> = applier.clone();
        let buffer = StorageChangeBuffer::new(flusher, config.buffer);
        Self {
            name,
            state,
            bus,
            applier,
            buffer,
            closed: AtomicBool::new(false),
        }
    }

    /// The journal flushed change sets are appended to, if configured.
    pub fn journal(&self) -> Option<&ChangeJournal> {
        self.applier.journal.as_ref()
    }

    /// Apply a change set directly, bypassing the buffer and the journal.
    ///
    /// Used to re-apply sets recovered from a journal. The same validation as
    /// a regular flush applies, and the set is applied entirely or not at all.
    pub fn replay(&self, changes: &StorageChangeSet) -> StorageResult<()> {
        self.ensure_open()?;
        self.applier.apply(changes, false)?;
        info!(records = changes.len(), "replayed storage changes");
        Ok(())
    }

    /// Drop buffered time-series changes that have not been flushed.
    pub fn discard_pending_changes(&self) -> StorageChangeSet {
        self.buffer.discard()
    }

    /// Number of buffered time-series changes.
    pub fn pending_change_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StorageState> {
        self.state.read().expect("lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StorageState> {
        self.state.write().expect("lock poisoned")
    }

    fn check_node(&self, id: &NodeId) -> StorageResult<()> {
        self.read_state().node(id).map(|_| ())
    }
}

impl AppStorage for InMemoryAppStorage {
    fn file_system_name(&self) -> &str {
        &self.name
    }

    fn create_root_node_if_not_exists(&self, name: &str, pseudo_class: &str) -> StorageResult<NodeInfo> {
        self.ensure_open()?;
        let mut state = self.write_state();
        if let Some(root) = state.root {
            return state.info(&root);
        }
        let info = NodeInfo::new(NodeId::new(), name, pseudo_class, "", 0, NodeMetadata::new());
        state.root = Some(info.id);
        state.insert_node(info.clone(), None);
        drop(state);

        debug!(node = %info.id, name, "root node created");
        self.bus.push_event(NodeEvent::NodeCreated {
            id: info.id,
            parent_id: None,
        });
        Ok(info)
    }

    fn create_node(
        &self,
        parent: &NodeId,
        name: &str,
        pseudo_class: &str,
        description: &str,
        version: u32,
        metadata: NodeMetadata,
    ) -> StorageResult<NodeInfo> {
        self.ensure_open()?;
        let mut state = self.write_state();
        if state.node(parent)?.children.contains_key(name) {
            return Err(StorageError::DuplicateChildName {
                parent: *parent,
                name: name.to_string(),
            });
        }
        let info = NodeInfo::new(NodeId::new(), name, pseudo_class, description, version, metadata);
        state.insert_node(info.clone(), Some(*parent));
        state.node_mut(parent)?.children.insert(name.to_string(), info.id);
        drop(state);

        debug!(node = %info.id, parent = %parent, name, pseudo_class, "node created");
        self.bus.push_event(NodeEvent::NodeCreated {
            id: info.id,
            parent_id: Some(*parent),
        });
        Ok(info)
    }

    fn get_node_info(&self, id: &NodeId) -> StorageResult<NodeInfo> {
        self.read_state().info(id)
    }

    fn get_child_nodes(&self, id: &NodeId) -> StorageResult<Vec<NodeInfo>> {
        let state = self.read_state();
        state
            .node(id)?
            .children
            .values()
            .map(|child| state.info(child))
            .collect()
    }

    fn get_child_node(&self, parent: &NodeId, name: &str) -> StorageResult<Option<NodeInfo>> {
        let state = self.read_state();
        match state.node(parent)?.children.get(name) {
            Some(child) => state.info(child).map(Some),
            None => Ok(None),
        }
    }

    fn get_parent_node(&self, id: &NodeId) -> StorageResult<Option<NodeInfo>> {
        let state = self.read_state();
        match state.node(id)?.parent {
            Some(parent) => state.info(&parent).map(Some),
            None => Ok(None),
        }
    }

    fn rename_node(&self, id: &NodeId, name: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.write_state();
        let entry = state.node(id)?;
        let old_name = entry.info.name.clone();
        if old_name == name {
            return Ok(());
        }
        if let Some(parent) = entry.parent {
            let siblings = &mut state.node_mut(&parent)?.children;
            if siblings.contains_key(name) {
                return Err(StorageError::DuplicateChildName {
                    parent,
                    name: name.to_string(),
                });
            }
            siblings.remove(&old_name);
            siblings.insert(name.to_string(), *id);
        }
        let entry = state.node_mut(id)?;
        entry.info.name = name.to_string();
        entry.info.modification_time = now_millis();
        drop(state);

        self.bus.push_event(NodeEvent::NodeNameUpdated {
            id: *id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn set_description(&self, id: &NodeId, description: &str) -> StorageResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.write_state();
            let info = &mut state.node_mut(id)?.info;
            info.description = description.to_string();
            info.modification_time = now_millis();
        }
        self.bus.push_event(NodeEvent::NodeDescriptionUpdated {
            id: *id,
            description: description.to_string(),
        });
        Ok(())
    }

    fn set_metadata(&self, id: &NodeId, metadata: NodeMetadata) -> StorageResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.write_state();
            let info = &mut state.node_mut(id)?.info;
            info.metadata = metadata;
            info.modification_time = now_millis();
        }
        self.bus.push_event(NodeEvent::NodeMetadataUpdated { id: *id });
        Ok(())
    }

    fn update_modification_time(&self, id: &NodeId) -> StorageResult<()> {
        self.ensure_open()?;
        self.write_state().node_mut(id)?.info.modification_time = now_millis();
        Ok(())
    }

    fn delete_node(&self, id: &NodeId) -> StorageResult<Option<NodeId>> {
        self.ensure_open()?;
        // Buffered changes for the doomed subtree would never apply afterwards.
        self.buffer.flush()?;

        let mut events = Vec::new();
        let parent = {
            let mut state = self.write_state();
            let parent = state.node(id)?.parent.ok_or(StorageError::RootDeletion(*id))?;
            let doomed = state.subtree(id);
            let doomed_set: HashSet<NodeId> = doomed.iter().copied().collect();

            for node in &doomed {
                let slots: Vec<usize> = state
                    .outgoing
                    .get(node)
                    .into_iter()
                    .flatten()
                    .chain(state.incoming.get(node).into_iter().flatten())
                    .copied()
                    .collect();
                for slot in slots {
                    let Some(edge) = state.remove_edge(slot) else {
                        continue;
                    };
                    if !doomed_set.contains(&edge.to) {
                        events.push(NodeEvent::BackwardDependencyRemoved {
                            id: edge.to,
                            dependency_name: edge.name.clone(),
                        });
                    }
                    if !doomed_set.contains(&edge.from) {
                        events.push(NodeEvent::DependencyRemoved {
                            id: edge.from,
                            dependency_name: edge.name,
                        });
                    }
                }
                state.outgoing.remove(node);
                state.incoming.remove(node);
                state.series.remove(node);
            }

            for node in doomed.iter().rev() {
                if let Some(entry) = state.nodes.remove(node) {
                    events.push(NodeEvent::NodeRemoved {
                        id: *node,
                        parent_id: entry.parent,
                    });
                }
            }
            if let Some(entry) = state.nodes.get_mut(&parent) {
                entry.children.retain(|_, child| child != id);
            }
            parent
        };

        debug!(node = %id, removed = events.len(), "node deleted");
        for event in events {
            self.bus.push_event(event);
        }
        Ok(Some(parent))
    }

    fn read_binary_data(&self, id: &NodeId, name: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        let state = self.read_state();
        Ok(state
            .node(id)?
            .data
            .get(name)
            .map(|bytes| Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>))
    }

    fn write_binary_data(&self, id: &NodeId, name: &str) -> StorageResult<Box<dyn BinarySink>> {
        self.ensure_open()?;
        self.check_node(id)?;
        Ok(Box::new(MemoryBinarySink {
            state: Arc::clone(&self.state),
            bus: Arc::clone(&self.bus),
            node: *id,
            name: name.to_string(),
            bytes: Vec::new(),
        }))
    }

    fn get_data_names(&self, id: &NodeId) -> StorageResult<Vec<String>> {
        Ok(self.read_state().node(id)?.data.keys().cloned().collect())
    }

    fn data_exists(&self, id: &NodeId, name: &str) -> StorageResult<bool> {
        Ok(self.read_state().node(id)?.data.contains_key(name))
    }

    fn remove_data(&self, id: &NodeId, name: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        let removed = self.write_state().node_mut(id)?.data.remove(name).is_some();
        if removed {
            self.bus.push_event(NodeEvent::NodeDataRemoved {
                id: *id,
                data_name: name.to_string(),
            });
        }
        Ok(removed)
    }

    fn add_dependency(&self, id: &NodeId, name: &str, to: &NodeId) -> StorageResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.write_state();
            state.node(id)?;
            state.node(to)?;
            if state.find_edge(id, name, to).is_some() {
                return Ok(());
            }
            state.insert_edge(Edge {
                from: *id,
                name: name.to_string(),
                to: *to,
            });
        }

        debug!(from = %id, relation = name, to = %to, "dependency added");
        self.bus.push_event(NodeEvent::DependencyAdded {
            id: *id,
            dependency_name: name.to_string(),
        });
        self.bus.push_event(NodeEvent::BackwardDependencyAdded {
            id: *to,
            dependency_name: name.to_string(),
        });
        Ok(())
    }

    fn get_dependencies(&self, id: &NodeId, name: &str) -> StorageResult<Vec<NodeInfo>> {
        let state = self.read_state();
        state.node(id)?;
        state
            .outgoing_edges(id)
            .filter(|edge| edge.name == name)
            .map(|edge| state.info(&edge.to))
            .collect()
    }

    fn get_all_dependencies(&self, id: &NodeId) -> StorageResult<Vec<NodeDependency>> {
        let state = self.read_state();
        state.node(id)?;
        state
            .outgoing_edges(id)
            .map(|edge| Ok(NodeDependency::new(edge.name.clone(), state.info(&edge.to)?)))
            .collect()
    }

    fn get_backward_dependencies(&self, id: &NodeId) -> StorageResult<Vec<NodeInfo>> {
        let state = self.read_state();
        state.node(id)?;
        let mut seen = HashSet::new();
        let mut infos = Vec::new();
        for slot in state.incoming.get(id).into_iter().flatten() {
            if let Some(edge) = &state.edges[*slot] {
                if seen.insert(edge.from) {
                    infos.push(state.info(&edge.from)?);
                }
            }
        }
        Ok(infos)
    }

    fn remove_dependency(&self, id: &NodeId, name: &str, to: &NodeId) -> StorageResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.write_state();
            state.node(id)?;
            let Some(slot) = state.find_edge(id, name, to) else {
                return Ok(());
            };
            state.remove_edge(slot);
        }

        debug!(from = %id, relation = name, to = %to, "dependency removed");
        self.bus.push_event(NodeEvent::DependencyRemoved {
            id: *id,
            dependency_name: name.to_string(),
        });
        self.bus.push_event(NodeEvent::BackwardDependencyRemoved {
            id: *to,
            dependency_name: name.to_string(),
        });
        Ok(())
    }

    /// Edges kept by the new list stay in their arena slots; only the
    /// node's slot order changes. A pure reorder reports a removal followed
    /// by an addition on the owner.
    fn set_dependencies(&self, id: &NodeId, name: &str, targets: &[NodeId]) -> StorageResult<()> {
        self.ensure_open()?;
        let mut events = Vec::new();
        {
            let mut guard = self.write_state();
            let state = &mut *guard;
            state.node(id)?;
            let mut wanted: Vec<NodeId> = Vec::with_capacity(targets.len());
            for target in targets {
                state.node(target)?;
                if !wanted.contains(target) {
                    wanted.push(*target);
                }
            }

            let current: Vec<(usize, NodeId)> = state
                .outgoing
                .get(id)
                .into_iter()
                .flatten()
                .filter_map(|slot| {
                    state.edges[*slot]
                        .as_ref()
                        .filter(|e| e.name == name)
                        .map(|e| (*slot, e.to))
                })
                .collect();

            for (slot, to) in &current {
                if !wanted.contains(to) {
                    state.remove_edge(*slot);
                    events.push(NodeEvent::DependencyRemoved {
                        id: *id,
                        dependency_name: name.to_string(),
                    });
                    events.push(NodeEvent::BackwardDependencyRemoved {
                        id: *to,
                        dependency_name: name.to_string(),
                    });
                }
            }
            let kept_before: Vec<usize> = current
                .iter()
                .filter(|(_, to)| wanted.contains(to))
                .map(|(slot, _)| *slot)
                .collect();

            let mut ordered = Vec::with_capacity(wanted.len());
            for target in &wanted {
                match current.iter().find(|(_, to)| to == target) {
                    Some((slot, _)) => ordered.push(*slot),
                    None => {
                        ordered.push(state.insert_edge(Edge {
                            from: *id,
                            name: name.to_string(),
                            to: *target,
                        }));
                        events.push(NodeEvent::DependencyAdded {
                            id: *id,
                            dependency_name: name.to_string(),
                        });
                        events.push(NodeEvent::BackwardDependencyAdded {
                            id: *target,
                            dependency_name: name.to_string(),
                        });
                    }
                }
            }
            let kept_after: Vec<usize> = ordered
                .iter()
                .copied()
                .filter(|slot| kept_before.contains(slot))
                .collect();

            // Rewrite this relation's positions in the node's slot list.
            let edges = &state.edges;
            if let Some(slots) = state.outgoing.get_mut(id) {
                let mut next = ordered.iter().copied();
                for slot in slots.iter_mut() {
                    let in_relation = edges[*slot].as_ref().is_some_and(|e| e.name == name);
                    if in_relation {
                        if let Some(replacement) = next.next() {
                            *slot = replacement;
                        }
                    }
                }
            }

            if events.is_empty() && kept_before != kept_after {
                events.push(NodeEvent::DependencyRemoved {
                    id: *id,
                    dependency_name: name.to_string(),
                });
                events.push(NodeEvent::DependencyAdded {
                    id: *id,
                    dependency_name: name.to_string(),
                });
            }
        }

        debug!(node = %id, relation = name, count = targets.len(), "dependencies set");
        for event in events {
            self.bus.push_event(event);
        }
        Ok(())
    }

    fn create_time_series(&self, id: &NodeId, metadata: TimeSeriesMetadata) -> StorageResult<()> {
        self.ensure_open()?;
        self.check_node(id)?;
        metadata.index.validate()?;
        self.buffer.create_time_series(*id, metadata)
    }

    fn get_time_series_names(&self, id: &NodeId) -> StorageResult<Vec<String>> {
        let state = self.read_state();
        state.node(id)?;
        Ok(state
            .series
            .get(id)
            .map(|all| all.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn time_series_exists(&self, id: &NodeId, name: &str) -> StorageResult<bool> {
        let state = self.read_state();
        state.node(id)?;
        Ok(state.series.get(id).is_some_and(|all| all.contains_key(name)))
    }

    fn get_time_series_metadata(&self, id: &NodeId, name: &str) -> StorageResult<TimeSeriesMetadata> {
        Ok(self.read_state().series(id, name)?.metadata.clone())
    }

    fn get_time_series_data_versions(&self, id: &NodeId, name: &str) -> StorageResult<Vec<u32>> {
        Ok(self.read_state().series(id, name)?.data.versions())
    }

    fn add_double_time_series_data(
        &self,
        id: &NodeId,
        version: u32,
        name: &str,
        chunks: Vec<DoubleDataChunk>,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        self.check_node(id)?;
        for chunk in &chunks {
            chunk.validate()?;
        }
        self.buffer.add_double_time_series_data(*id, version, name, chunks)
    }

    fn add_string_time_series_data(
        &self,
        id: &NodeId,
        version: u32,
        name: &str,
        chunks: Vec<StringDataChunk>,
    ) -> StorageResult<()> {
        self.ensure_open()?;
        self.check_node(id)?;
        for chunk in &chunks {
            chunk.validate()?;
        }
        self.buffer.add_string_time_series_data(*id, version, name, chunks)
    }

    fn get_double_time_series_data(&self, id: &NodeId, version: u32, name: &str) -> StorageResult<Vec<DoubleDataChunk>> {
        let state = self.read_state();
        let series = state.series(id, name)?;
        match &series.data {
            SeriesData::Double(versions) => Ok(versions.get(&version).cloned().unwrap_or_default()),
            SeriesData::String(_) => Err(type_mismatch(&series.metadata, TimeSeriesDataType::Double)),
        }
    }

    fn get_string_time_series_data(&self, id: &NodeId, version: u32, name: &str) -> StorageResult<Vec<StringDataChunk>> {
        let state = self.read_state();
        let series = state.series(id, name)?;
        match &series.data {
            SeriesData::String(versions) => Ok(versions.get(&version).cloned().unwrap_or_default()),
            SeriesData::Double(_) => Err(type_mismatch(&series.metadata, TimeSeriesDataType::String)),
        }
    }

    fn clear_time_series(&self, id: &NodeId) -> StorageResult<()> {
        self.ensure_open()?;
        self.buffer.flush()?;
        {
            let mut state = self.write_state();
            state.node(id)?;
            state.series.remove(id);
        }
        self.bus.push_event(NodeEvent::TimeSeriesCleared { id: *id });
        Ok(())
    }

    fn events_bus(&self) -> &EventsBus {
        &self.bus
    }

    /// Flush buffered time-series changes, then deliver pending events.
    ///
    /// Node, stream and edge mutations are committed as they are made, so
    /// their events are delivered even when the buffered changes are rejected.
    fn flush(&self) -> StorageResult<()> {
        self.ensure_open()?;
        let flushed = self.buffer.flush();
        self.bus.flush();
        flushed
    }

    fn close(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        self.bus.clear();
        info!(name = %self.name, "storage closed");
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryAppStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAppStorage")
            .field("name", &self.name)
            .field("nodes", &self.read_state().nodes.len())
            .field("pending_changes", &self.buffer.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
