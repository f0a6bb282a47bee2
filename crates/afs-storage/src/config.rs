use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Storage configuration, usually loaded from a TOML file.
///
/// ```toml
/// [buffer]
/// max-change-count = 100
/// max-change-size = 1048576
///
/// [journal]
/// path = "/var/lib/afs/changes.journal"
/// sync-mode = "every-write"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    pub buffer: BufferConfig,
    pub journal: Option<JournalConfig>,
}

impl StorageConfig {
    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        toml::from_str(s).map_err(|e| StorageError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StorageResult<String> {
        toml::to_string(self).map_err(|e| StorageError::Config(e.to_string()))
    }
}

/// Automatic flush thresholds of the change buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BufferConfig {
    pub max_change_count: usize,
    /// Estimated bytes.
    pub max_change_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_change_count: 100,
            max_change_size: 1024 * 1024, // 1 MiB
        }
    }
}

/// Where and how flushed change sets are journaled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JournalConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub sync_mode: SyncMode,
}

/// Flush/sync strategy for the journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Rely on OS page-cache buffering.
    #[default]
    OsDefault,
}
