//! In-memory blob index for tests and ephemeral use.
//!
//! [`MemoryIndex`] stores all entries in a `BTreeMap` protected by a
//! `RwLock`. It starts empty on every open, so a storage engine using it
//! rebuilds its whole index from the pack files at startup.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use diskpack_types::{BlobLocation, BlobRef};

use crate::error::{IndexError, IndexResult};
use crate::traits::SortedIndex;

/// An in-memory implementation of [`SortedIndex`].
///
/// Watermarks are never retained: every pack reports `None`, which makes
/// recovery rescan each pack from offset 0.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<BTreeMap<BlobRef, BlobLocation>>,
    closed: AtomicBool,
}

impl MemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self) -> IndexResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }
}

impl SortedIndex for MemoryIndex {
    fn get(&self, blob_ref: &BlobRef) -> IndexResult<Option<BlobLocation>> {
        self.check_open()?;
        let entries = self
            .entries
            .read()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(entries.get(blob_ref).copied())
    }

    fn set(&self, blob_ref: &BlobRef, location: BlobLocation) -> IndexResult<()> {
        self.check_open()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        entries.insert(blob_ref.clone(), location);
        Ok(())
    }

    fn delete(&self, blob_ref: &BlobRef) -> IndexResult<bool> {
        self.check_open()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(entries.remove(blob_ref).is_some())
    }

    fn enumerate(
        &self,
        after: Option<&BlobRef>,
        limit: usize,
    ) -> IndexResult<Vec<(BlobRef, BlobLocation)>> {
        self.check_open()?;
        let entries = self
            .entries
            .read()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(range_after(&entries, after, limit))
    }

    fn watermark(&self, _pack: u32) -> IndexResult<Option<u64>> {
        self.check_open()?;
        Ok(None)
    }

    fn set_watermark(&self, _pack: u32, _end: u64) -> IndexResult<()> {
        self.check_open()
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn close(&self) -> IndexResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Collect up to `limit` entries strictly after `after`.
pub(crate) fn range_after(
    map: &BTreeMap<BlobRef, BlobLocation>,
    after: Option<&BlobRef>,
    limit: usize,
) -> Vec<(BlobRef, BlobLocation)> {
    let lower = match after {
        Some(r) => Bound::Excluded(r),
        None => Bound::Unbounded,
    };
    map.range::<BlobRef, _>((lower, Bound::Unbounded))
        .take(limit)
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}
