use std::path::{Path, PathBuf};

use diskpack_index::{IndexConfig, SyncMode};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Default size limit for a pack file before rotation: 512 MiB.
pub const DEFAULT_MAX_PACK_SIZE: u64 = 512 * 1024 * 1024;

/// Everything the engine consumes at open time.
///
/// ```toml
/// root = "/var/lib/diskpack"
/// max_pack_size = 536870912
/// sync = "os-default"
///
/// [index]
/// type = "log"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub max_pack_size: u64,
    /// Sync policy for pack appends.
    pub sync: SyncMode,
    pub index: IndexConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_pack_size: DEFAULT_MAX_PACK_SIZE,
            sync: SyncMode::default(),
            index: IndexConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(StoreError::Config("root must not be empty".into()));
        }
        if self.max_pack_size == 0 {
            return Err(StoreError::Config("max_pack_size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.max_pack_size, 512 * 1024 * 1024);
        assert_eq!(c.sync, SyncMode::OsDefault);
        assert_eq!(c.index.kind(), "log");
        c.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let c = StoreConfig::from_toml_str(
            r#"
            root = "/srv/blobs"
            max_pack_size = 1048576
            sync = "every-write"

            [index]
            type = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(c.root, PathBuf::from("/srv/blobs"));
        assert_eq!(c.max_pack_size, 1 << 20);
        assert_eq!(c.sync, SyncMode::EveryWrite);
        assert_eq!(c.index, IndexConfig::Memory);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let c = StoreConfig::from_toml_str("root = \"data\"\n").unwrap();
        assert_eq!(c.max_pack_size, DEFAULT_MAX_PACK_SIZE);
        assert_eq!(c.index, IndexConfig::default());
    }

    #[test]
    fn rejects_unknown_index_type() {
        let err = StoreConfig::from_toml_str("[index]\ntype = \"cassandra\"\n").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn rejects_zero_pack_size() {
        let err = StoreConfig::from_toml_str("max_pack_size = 0\n").unwrap_err();
        assert!(matches!(err, StoreError::Config(m) if m.contains("max_pack_size")));
    }

    #[test]
    fn rejects_empty_root() {
        assert!(StoreConfig::new("").validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diskpack.toml");
        std::fs::write(&path, "max_pack_size = 4096\n").unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap().max_pack_size, 4096);
        assert!(StoreConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
