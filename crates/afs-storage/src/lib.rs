//! Storage contract for the application file system (AFS).
//!
//! [`AppStorage`] is the interface every backend implements: a tree of
//! nodes, named binary streams per node, named and ordered dependency edges
//! between nodes, and time series. Mutations push [`NodeEvent`]s onto the
//! storage's [`EventsBus`], which delivers them to subscribers when the
//! storage is flushed.
//!
//! # Time-series changes
//!
//! Time-series writes are not applied directly. They are appended as
//! [`StorageChange`] records to a [`StorageChangeBuffer`], which hands them
//! over as a [`StorageChangeSet`] when flushed, either explicitly or once a
//! size threshold from [`BufferConfig`] is crossed. A change set serializes
//! to JSON and parses back unchanged, and can be appended to a CRC-framed
//! [`ChangeJournal`].
//!
//! # Backends
//!
//! - [`InMemoryAppStorage`] -- everything in memory, optional journal

pub mod buffer;
pub mod change;
pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod memory;
pub mod traits;

pub use buffer::{StorageChangeBuffer, StorageChangeFlusher};
pub use change::{StorageChange, StorageChangeSet};
pub use config::{BufferConfig, JournalConfig, StorageConfig, SyncMode};
pub use error::{StorageError, StorageResult};
pub use events::{EventsBus, ListenerHandle, NodeEvent, NodeEventList, StorageListener, Topic};
pub use journal::ChangeJournal;
pub use memory::InMemoryAppStorage;
pub use traits::{AppStorage, BinarySink};
