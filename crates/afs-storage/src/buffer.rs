use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use afs_timeseries::{DoubleDataChunk, StringDataChunk, TimeSeriesMetadata};
use afs_types::NodeId;

use crate::change::{StorageChange, StorageChangeSet};
use crate::config::BufferConfig;
use crate::error::StorageResult;

/// Destination of flushed change sets.
pub trait StorageChangeFlusher: Send + Sync {
    /// Make the given changes durable. Either all of them are applied or,
    /// on error, none are.
    fn flush(&self, changes: &StorageChangeSet) -> StorageResult<()>;
}

impl<F> StorageChangeFlusher for F
where
    F: Fn(&StorageChangeSet) -> StorageResult<()> + Send + Sync,
{
    fn flush(&self, changes: &StorageChangeSet) -> StorageResult<()> {
        self(changes)
    }
}

#[derive(Default)]
struct BufferState {
    changes: StorageChangeSet,
    size: usize,
}

/// Accumulates change records and hands them to a flusher in batches.
///
/// The buffer flushes on its own once it holds `max_change_count` records
/// or an estimated `max_change_size` bytes. A failed flush puts the records
/// back. When an automatic flush fails, [`Self::add_change`] reports the
/// error without keeping the new record.
pub struct StorageChangeBuffer {
    flusher: Arc<dyn StorageChangeFlusher>,
    config: BufferConfig,
    state: Mutex<BufferState>,
}

impl StorageChangeBuffer {
    pub fn new(flusher: Arc<dyn StorageChangeFlusher>, config: BufferConfig) -> Self {
        Self {
            flusher,
            config,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn create_time_series(&self, node_id: NodeId, metadata: TimeSeriesMetadata) -> StorageResult<()> {
        self.add_change(StorageChange::TimeSeriesCreation { node_id, metadata })
    }

    pub fn add_double_time_series_data(
        &self,
        node_id: NodeId,
        version: u32,
        time_series_name: &str,
        chunks: Vec<DoubleDataChunk>,
    ) -> StorageResult<()> {
        self.add_change(StorageChange::DoubleTimeSeriesChunksAddition {
            node_id,
            version,
            time_series_name: time_series_name.to_string(),
            chunks,
        })
    }

    pub fn add_string_time_series_data(
        &self,
        node_id: NodeId,
        version: u32,
        time_series_name: &str,
        chunks: Vec<StringDataChunk>,
    ) -> StorageResult<()> {
        self.add_change(StorageChange::StringTimeSeriesChunksAddition {
            node_id,
            version,
            time_series_name: time_series_name.to_string(),
            chunks,
        })
    }

    /// Append a record, flushing first-in-first-out when a threshold is reached.
    ///
    /// If that flush fails the record is taken back out, so the call has no
    /// effect and may be retried.
    pub fn add_change(&self, change: StorageChange) -> StorageResult<()> {
        let mut state = self.state.lock().expect("buffer lock poisoned");
        let size = change.estimated_size();
        debug!(node = %change.node_id(), series = change.time_series_name(), "buffered change");
        state.size += size;
        state.changes.push(change);

        if state.changes.len() >= self.config.max_change_count
            || state.size >= self.config.max_change_size
        {
            if let Err(e) = self.flush_locked(&mut state) {
                state.changes.pop();
                state.size -= size;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Hand every buffered record to the flusher. No-op when empty.
    pub fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.lock().expect("buffer lock poisoned");
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut BufferState) -> StorageResult<()> {
        if state.changes.is_empty() {
            return Ok(());
        }
        let taken = std::mem::take(state);
        match self.flusher.flush(&taken.changes) {
            Ok(()) => {
                info!(count = taken.changes.len(), size = taken.size, "flushed storage changes");
                Ok(())
            }
            Err(e) => {
                *state = taken;
                Err(e)
            }
        }
    }

    /// Drop every buffered record without flushing and return them.
    pub fn discard(&self) -> StorageChangeSet {
        let mut state = self.state.lock().expect("buffer lock poisoned");
        let taken = std::mem::take(&mut *state);
        if !taken.changes.is_empty() {
            warn!(count = taken.changes.len(), "discarded buffered storage changes");
        }
        taken.changes
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.state.lock().expect("buffer lock poisoned").changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated size of the buffered records, in bytes.
    pub fn size(&self) -> usize {
        self.state.lock().expect("buffer lock poisoned").size
    }
}

impl std::fmt::Debug for StorageChangeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageChangeBuffer")
            .field("changes", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
