//! The numbered collection of pack files and the rotation policy.
//!
//! Packs live directly in the storage root as `pack-00000.blobs`,
//! `pack-00001.blobs`, and so on. The highest-numbered pack is the active
//! one; every lower-numbered pack is frozen and never written again.

use std::fs;
use std::path::{Path, PathBuf};

use diskpack_index::SyncMode;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::writer::ActivePack;

const PACK_PREFIX: &str = "pack-";
const PACK_SUFFIX: &str = ".blobs";

/// Deterministic path of pack `n` under `root`.
pub fn pack_filename(root: &Path, n: u32) -> PathBuf {
    root.join(format!("{PACK_PREFIX}{n:05}{PACK_SUFFIX}"))
}

/// Parse the pack number out of a file name, if it names a pack.
pub fn parse_pack_number(file_name: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix(PACK_PREFIX)?
        .strip_suffix(PACK_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Numbers of all pack files present under `root`, ascending.
pub fn list_packs(root: &Path) -> StoreResult<Vec<u32>> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(parse_pack_number) {
            numbers.push(n);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Owns the active pack handle and decides when to rotate.
///
/// Not thread-safe on its own; the storage engine keeps it behind its
/// write lock.
pub struct PackSet {
    root: PathBuf,
    max_pack_size: u64,
    sync_mode: SyncMode,
    /// `None` once closed.
    active: Option<ActivePack>,
}

impl PackSet {
    /// Scan `root` for packs and open the highest-numbered one, creating
    /// `pack-00000` in an empty directory.
    pub fn open_or_create(
        root: &Path,
        max_pack_size: u64,
        sync_mode: SyncMode,
    ) -> StoreResult<Self> {
        fs::create_dir_all(root).map_err(|source| StoreError::PackOpen {
            path: root.to_path_buf(),
            source,
        })?;

        let packs = list_packs(root)?;
        let number = packs.last().copied().unwrap_or(0);
        let active = ActivePack::open(number, &pack_filename(root, number), sync_mode)?;
        info!(
            root = %root.display(),
            packs = packs.len().max(1),
            active = number,
            active_len = active.len(),
            "pack set opened"
        );

        Ok(Self {
            root: root.to_path_buf(),
            max_pack_size,
            sync_mode,
            active: Some(active),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_pack_size(&self) -> u64 {
        self.max_pack_size
    }

    /// Path of pack `n` in this set.
    pub fn filename(&self, n: u32) -> PathBuf {
        pack_filename(&self.root, n)
    }

    /// Numbers of all packs currently on disk.
    pub fn list(&self) -> StoreResult<Vec<u32>> {
        list_packs(&self.root)
    }

    pub fn active(&self) -> StoreResult<&ActivePack> {
        self.active.as_ref().ok_or(StoreError::Closed)
    }

    pub fn active_mut(&mut self) -> StoreResult<&mut ActivePack> {
        self.active.as_mut().ok_or(StoreError::Closed)
    }

    /// Retire the active pack and start an empty one numbered one higher.
    pub fn next_pack(&mut self) -> StoreResult<u32> {
        let current = self.active.take().ok_or(StoreError::Closed)?;
        let next = current.number() + 1;
        if let Err(e) = current.sync() {
            self.active = Some(current);
            return Err(e);
        }
        let retired_len = current.len();
        drop(current);

        let active = ActivePack::open(next, &self.filename(next), self.sync_mode)?;
        info!(retired = next - 1, retired_len, active = next, "pack rotated");
        self.active = Some(active);
        Ok(next)
    }

    /// Rotate first if appending `frame_len` bytes would push a non-empty
    /// active pack past the size limit, if the active file holds bytes
    /// past its last good record, or if its path no longer names the open
    /// file. Returns whether a rotation happened.
    ///
    /// A record larger than the limit still goes whole into one pack.
    pub fn ensure_room(&mut self, frame_len: u64) -> StoreResult<bool> {
        let active = self.active()?;
        if active.is_detached()? {
            warn!(
                pack = active.number(),
                path = %active.path().display(),
                "active pack was removed or replaced; rotating"
            );
            self.next_pack()?;
            return Ok(true);
        }
        let file_len = active.file_len()?;
        if file_len != active.len() {
            warn!(
                pack = active.number(),
                validated = active.len(),
                file_len,
                "active pack has unvalidated bytes; rotating"
            );
            self.next_pack()?;
            return Ok(true);
        }
        if active.len() > 0 && active.len().saturating_add(frame_len) > self.max_pack_size {
            self.next_pack()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Swap in a different active handle.
    #[cfg(test)]
    pub(crate) fn replace_active(&mut self, active: ActivePack) -> Option<ActivePack> {
        self.active.replace(active)
    }

    /// Sync and release the active pack. Later calls fail with `Closed`.
    pub fn close(&mut self) -> StoreResult<()> {
        if let Some(active) = self.active.take() {
            active.sync()?;
        }
        Ok(())
    }
}
