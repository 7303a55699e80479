//! Index backend selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IndexResult;
use crate::log::{LogIndex, SyncMode, DEFAULT_LOG_FILE};
use crate::memory::MemoryIndex;
use crate::traits::SortedIndex;

/// Which [`SortedIndex`] backend to open, tagged by `type`.
///
/// ```toml
/// [index]
/// type = "log"
/// file = "index.log"
/// sync = "every-write"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IndexConfig {
    /// Durable log-structured index.
    Log {
        /// Log file; relative paths resolve against the storage root.
        #[serde(default)]
        file: Option<PathBuf>,
        #[serde(default)]
        sync: SyncMode,
    },
    /// Ephemeral in-memory index, empty on every open.
    Memory,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::Log {
            file: None,
            sync: SyncMode::default(),
        }
    }
}

impl IndexConfig {
    /// Shorthand for the default durable log index.
    pub fn log() -> Self {
        Self::default()
    }

    /// Short backend name for logs and tooling.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Memory => "memory",
        }
    }
}

/// Open the backend described by `config` for a store rooted at `root`.
pub fn open_index(config: &IndexConfig, root: &Path) -> IndexResult<Arc<dyn SortedIndex>> {
    match config {
        IndexConfig::Log { file, sync } => {
            let path = match file {
                Some(f) if f.is_absolute() => f.clone(),
                Some(f) => root.join(f),
                None => root.join(DEFAULT_LOG_FILE),
            };
            Ok(Arc::new(LogIndex::open(&path, *sync)?))
        }
        IndexConfig::Memory => Ok(Arc::new(MemoryIndex::new())),
    }
}
