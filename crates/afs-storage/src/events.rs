//! Storage events and the synchronous event bus.
//!
//! Mutating storage calls push [`NodeEvent`]s onto the store's
//! [`EventsBus`]. Pending events are delivered as one [`NodeEventList`] when
//! the bus is flushed (the store flushes it as part of `flush()`).
//! Delivery is synchronous, on the flushing thread, in subscription order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use afs_types::NodeId;

/// A single storage mutation notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum NodeEvent {
    NodeCreated { id: NodeId, parent_id: Option<NodeId> },
    NodeRemoved { id: NodeId, parent_id: Option<NodeId> },
    NodeNameUpdated { id: NodeId, name: String },
    NodeDescriptionUpdated { id: NodeId, description: String },
    NodeMetadataUpdated { id: NodeId },
    NodeDataUpdated { id: NodeId, data_name: String },
    NodeDataRemoved { id: NodeId, data_name: String },
    DependencyAdded { id: NodeId, dependency_name: String },
    DependencyRemoved { id: NodeId, dependency_name: String },
    BackwardDependencyAdded { id: NodeId, dependency_name: String },
    BackwardDependencyRemoved { id: NodeId, dependency_name: String },
    TimeSeriesCreated { id: NodeId, time_series_name: String },
    TimeSeriesDataUpdated { id: NodeId, time_series_name: String },
    TimeSeriesCleared { id: NodeId },
    /// Cached state derived from this node's dependencies is stale.
    NodeInvalidated { id: NodeId },
}

impl NodeEvent {
    /// The node this event is about.
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::NodeCreated { id, .. }
            | Self::NodeRemoved { id, .. }
            | Self::NodeNameUpdated { id, .. }
            | Self::NodeDescriptionUpdated { id, .. }
            | Self::NodeMetadataUpdated { id }
            | Self::NodeDataUpdated { id, .. }
            | Self::NodeDataRemoved { id, .. }
            | Self::DependencyAdded { id, .. }
            | Self::DependencyRemoved { id, .. }
            | Self::BackwardDependencyAdded { id, .. }
            | Self::BackwardDependencyRemoved { id, .. }
            | Self::TimeSeriesCreated { id, .. }
            | Self::TimeSeriesDataUpdated { id, .. }
            | Self::TimeSeriesCleared { id }
            | Self::NodeInvalidated { id } => *id,
        }
    }

    /// Returns `true` if this event reports new content for `data_name` on `node`.
    pub fn is_data_update_of(&self, node: &NodeId, data_name: &str) -> bool {
        matches!(self, Self::NodeDataUpdated { id, data_name: d } if id == node && d == data_name)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::NodeCreated { .. } => "NodeCreated",
            Self::NodeRemoved { .. } => "NodeRemoved",
            Self::NodeNameUpdated { .. } => "NodeNameUpdated",
            Self::NodeDescriptionUpdated { .. } => "NodeDescriptionUpdated",
            Self::NodeMetadataUpdated { .. } => "NodeMetadataUpdated",
            Self::NodeDataUpdated { .. } => "NodeDataUpdated",
            Self::NodeDataRemoved { .. } => "NodeDataRemoved",
            Self::DependencyAdded { .. } => "DependencyAdded",
            Self::DependencyRemoved { .. } => "DependencyRemoved",
            Self::BackwardDependencyAdded { .. } => "BackwardDependencyAdded",
            Self::BackwardDependencyRemoved { .. } => "BackwardDependencyRemoved",
            Self::TimeSeriesCreated { .. } => "TimeSeriesCreated",
            Self::TimeSeriesDataUpdated { .. } => "TimeSeriesDataUpdated",
            Self::TimeSeriesCleared { .. } => "TimeSeriesCleared",
            Self::NodeInvalidated { .. } => "NodeInvalidated",
        }
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.node_id().short_id())
    }
}

/// An ordered batch of events delivered together.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeEventList {
    events: Vec<NodeEvent>,
}

impl NodeEventList {
    pub fn new(events: Vec<NodeEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[NodeEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The sub-list of events naming `node`, order preserved.
    pub fn for_node(&self, node: &NodeId) -> NodeEventList {
        Self::new(
            self.events
                .iter()
                .filter(|e| e.node_id() == *node)
                .cloned()
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a NodeEventList {
    type Item = &'a NodeEvent;
    type IntoIter = std::slice::Iter<'a, NodeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Callback invoked with each delivered batch.
pub type StorageListener = Arc<dyn Fn(&NodeEventList) + Send + Sync>;

/// Which events a subscriber receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every delivered batch.
    All,
    /// Only the events naming this node; batches with none are skipped.
    Node(NodeId),
}

/// Handle returned by [`EventsBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

struct Subscriber {
    handle: ListenerHandle,
    topic: Topic,
    listener: StorageListener,
}

/// Publish/subscribe bus owned by one storage instance.
pub struct EventsBus {
    pending: Mutex<Vec<NodeEvent>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_handle: AtomicU64,
}

impl EventsBus {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Queue an event for delivery on the next [`flush`](Self::flush).
    pub fn push_event(&self, event: NodeEvent) {
        self.pending.lock().expect("bus lock poisoned").push(event);
    }

    /// Number of events waiting for delivery.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("bus lock poisoned").len()
    }

    /// Register a listener and return its handle.
    pub fn subscribe(&self, topic: Topic, listener: StorageListener) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("bus lock poisoned")
            .push(Subscriber {
                handle,
                topic,
                listener,
            });
        handle
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut subs = self.subscribers.write().expect("bus lock poisoned");
        let before = subs.len();
        subs.retain(|s| s.handle != handle);
        subs.len() != before
    }

    /// Drop every subscriber and every pending event.
    pub fn clear(&self) {
        self.subscribers.write().expect("bus lock poisoned").clear();
        self.pending.lock().expect("bus lock poisoned").clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("bus lock poisoned").len()
    }

    /// Deliver all pending events and return how many were delivered.
    ///
    /// Listeners run after the bus locks are released, so they may push
    /// events, subscribe, or call back into the store. Events they push are
    /// delivered by the next flush.
    pub fn flush(&self) -> usize {
        let events = std::mem::take(&mut *self.pending.lock().expect("bus lock poisoned"));
        if events.is_empty() {
            return 0;
        }
        let list = NodeEventList::new(events);

        let targets: Vec<(Topic, StorageListener)> = self
            .subscribers
            .read()
            .expect("bus lock poisoned")
            .iter()
            .map(|s| (s.topic, Arc::clone(&s.listener)))
            .collect();

        for (topic, listener) in targets {
            match topic {
                Topic::All => listener(&list),
                Topic::Node(node) => {
                    let filtered = list.for_node(&node);
                    if !filtered.is_empty() {
                        listener(&filtered);
                    }
                }
            }
        }

        debug!(count = list.len(), "delivered storage events");
        list.len()
    }
}

impl Default for EventsBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventsBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsBus")
            .field("pending", &self.pending_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
