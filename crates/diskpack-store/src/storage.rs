//! The pack-file storage engine.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use diskpack_index::{open_index, IndexConfig, SortedIndex, SyncMode};
use diskpack_types::{BlobLocation, BlobRef, SizedRef};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::pack_set::{pack_filename, PackSet};
use crate::reader::{open_record, BlobReader};
use crate::recovery::{recover, scan_pack, PackScan, RecoveryReport, ReindexMode};
use crate::traits::BlobStorage;
use crate::writer::PendingRecord;

const INDEX_PAGE: usize = 1024;

/// Size of one pack file on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackInfo {
    pub number: u32,
    pub len: u64,
}

/// Snapshot of engine state for tooling.
#[derive(Clone, Debug, Serialize)]
pub struct StoreInfo {
    pub root: PathBuf,
    pub max_pack_size: u64,
    pub active_pack: u32,
    pub packs: Vec<PackInfo>,
    pub blobs: usize,
    pub durable_index: bool,
}

/// Blob storage over numbered, append-only pack files and a sorted index.
///
/// Receive, remove, rotation, and reindexing are serialized through one
/// lock around the [`PackSet`]. Lookups that only touch the index run
/// without it.
pub struct DiskPackedStorage {
    root: PathBuf,
    max_pack_size: u64,
    index: Arc<dyn SortedIndex>,
    packs: Mutex<PackSet>,
    opened_with: RecoveryReport,
    closed: AtomicBool,
}

impl DiskPackedStorage {
    /// Open the engine described by `config`, running recovery first.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.root).map_err(|source| StoreError::PackOpen {
            path: config.root.clone(),
            source,
        })?;
        let index = open_index(&config.index, &config.root)?;
        Self::assemble(&config.root, config.max_pack_size, config.sync, index)
    }

    /// Open with default sync behavior and the given index backend config.
    pub fn new(
        root: impl AsRef<Path>,
        max_pack_size: u64,
        index: IndexConfig,
    ) -> StoreResult<Self> {
        let config = StoreConfig {
            root: root.as_ref().to_path_buf(),
            max_pack_size,
            sync: SyncMode::default(),
            index,
        };
        Self::open(&config)
    }

    /// Open over an already-constructed index backend.
    pub fn with_index(
        root: impl AsRef<Path>,
        max_pack_size: u64,
        index: Arc<dyn SortedIndex>,
    ) -> StoreResult<Self> {
        let config = StoreConfig {
            root: root.as_ref().to_path_buf(),
            max_pack_size,
            ..StoreConfig::default()
        };
        config.validate()?;
        Self::assemble(&config.root, max_pack_size, config.sync, index)
    }

    fn assemble(
        root: &Path,
        max_pack_size: u64,
        sync: SyncMode,
        index: Arc<dyn SortedIndex>,
    ) -> StoreResult<Self> {
        let mut packs = PackSet::open_or_create(root, max_pack_size, sync)?;
        let report = recover(&packs, index.as_ref(), ReindexMode::Incremental)?;
        // Never append behind garbage: a scan from offset 0 would stop there.
        let active = packs.active()?.number();
        if report.damaged_packs.contains(&active) {
            warn!(pack = active, "active pack is damaged; starting a new one");
            packs.next_pack()?;
        }
        info!(
            root = %root.display(),
            max_pack_size,
            active = packs.active()?.number(),
            durable_index = index.is_durable(),
            "storage opened"
        );
        Ok(Self {
            root: root.to_path_buf(),
            max_pack_size,
            index,
            packs: Mutex::new(packs),
            opened_with: report,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, PackSet>> {
        self.ensure_open()?;
        self.packs
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_pack_size(&self) -> u64 {
        self.max_pack_size
    }

    /// What recovery found when this engine was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.opened_with
    }

    /// Deterministic path of pack `n`.
    pub fn filename(&self, n: u32) -> PathBuf {
        pack_filename(&self.root, n)
    }

    /// Number of the pack currently accepting appends.
    pub fn active_pack(&self) -> StoreResult<u32> {
        Ok(self.lock()?.active()?.number())
    }

    /// Store the content read from `content` under `blob_ref`.
    ///
    /// The content is read in full before the write lock is taken; a
    /// failing source leaves packs and index untouched. If the index
    /// already points at an intact copy nothing is written. A copy that
    /// fails verification is replaced by a fresh append to the active pack.
    pub fn receive<R: Read>(&self, blob_ref: &BlobRef, content: R) -> StoreResult<SizedRef> {
        self.ensure_open()?;
        let record = PendingRecord::read_from(blob_ref, content, None)?;

        let mut packs = self.lock()?;
        if let Some(loc) = self.index.get(blob_ref)? {
            match open_record(&packs.filename(loc.pack), blob_ref, loc) {
                Ok(_) => {
                    debug!(
                        blob_ref = %blob_ref,
                        pack = loc.pack,
                        size = loc.size,
                        "blob already stored"
                    );
                    return Ok(SizedRef::new(blob_ref.clone(), loc.size));
                }
                Err(e) => warn!(
                    blob_ref = %blob_ref,
                    pack = loc.pack,
                    offset = loc.offset,
                    error = %e,
                    "stored copy failed verification; rewriting"
                ),
            }
        }

        if packs.ensure_room(record.frame_len())? {
            debug!(blob_ref = %blob_ref, frame_len = record.frame_len(), "rotated before append");
        }
        let appended = packs.active_mut()?.append(&record)?;
        self.index.set(
            blob_ref,
            BlobLocation::new(appended.pack, appended.offset, appended.size),
        )?;
        self.index
            .set_watermark(appended.pack, appended.end(record.frame_len()))?;
        Ok(SizedRef::new(blob_ref.clone(), appended.size))
    }

    /// Receive every `(ref, content)` pair in order, checking `cancel`
    /// before each one.
    ///
    /// Blobs received before cancellation stay stored; no record is ever
    /// abandoned halfway.
    pub fn receive_all<I, R>(&self, blobs: I, cancel: &CancelToken) -> StoreResult<Vec<SizedRef>>
    where
        I: IntoIterator<Item = (BlobRef, R)>,
        R: Read,
    {
        let mut received = Vec::new();
        for (blob_ref, content) in blobs {
            if cancel.is_cancelled() {
                info!(received = received.len(), "batch receive cancelled");
                return Err(StoreError::Cancelled);
            }
            received.push(self.receive(&blob_ref, content)?);
        }
        Ok(received)
    }

    /// Open a reader over the content of `blob_ref`.
    pub fn fetch(&self, blob_ref: &BlobRef) -> StoreResult<(BlobReader, u64)> {
        // Held so the lookup and header check see a settled active pack.
        let packs = self.lock()?;
        let loc = self
            .index
            .get(blob_ref)?
            .ok_or_else(|| StoreError::NotFound(blob_ref.clone()))?;
        let reader = open_record(&packs.filename(loc.pack), blob_ref, loc)?;
        Ok((reader, loc.size))
    }

    pub fn stat_blobs(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedRef>> {
        self.ensure_open()?;
        let mut found = Vec::with_capacity(refs.len());
        for blob_ref in refs {
            if let Some(loc) = self.index.get(blob_ref)? {
                found.push(SizedRef::new(blob_ref.clone(), loc.size));
            }
        }
        Ok(found)
    }

    /// Drop the index entries for `refs`. Absent refs are ignored.
    pub fn remove_blobs(&self, refs: &[BlobRef]) -> StoreResult<()> {
        let _packs = self.lock()?;
        let mut removed = 0usize;
        for blob_ref in refs {
            if self.index.delete(blob_ref)? {
                removed += 1;
            }
        }
        debug!(requested = refs.len(), removed, "blobs removed");
        Ok(())
    }

    pub fn enumerate_blobs(
        &self,
        after: Option<&BlobRef>,
        limit: usize,
    ) -> StoreResult<Vec<SizedRef>> {
        self.ensure_open()?;
        Ok(self
            .index
            .enumerate(after, limit)?
            .into_iter()
            .map(|(blob_ref, loc)| SizedRef::new(blob_ref, loc.size))
            .collect())
    }

    /// Retire the active pack and start the next one.
    pub fn next_pack(&self) -> StoreResult<u32> {
        self.lock()?.next_pack()
    }

    /// Re-run recovery over every pack.
    pub fn reindex(&self, mode: ReindexMode) -> StoreResult<RecoveryReport> {
        let packs = self.lock()?;
        recover(&packs, self.index.as_ref(), mode)
    }

    /// Parse every pack from the start without touching the index.
    pub fn verify_packs(&self) -> StoreResult<Vec<PackScan>> {
        let packs = self.lock()?;
        let mut scans = Vec::new();
        for n in packs.list()? {
            let scan = scan_pack(&packs.filename(n), n, 0, |_| Ok(()))?;
            if let Some(reason) = &scan.malformed {
                warn!(
                    pack = n,
                    offset = scan.valid_end,
                    reason = %reason,
                    "pack has trailing garbage"
                );
            }
            scans.push(scan);
        }
        Ok(scans)
    }

    pub fn info(&self) -> StoreResult<StoreInfo> {
        let packs = self.lock()?;
        let mut pack_info = Vec::new();
        for n in packs.list()? {
            let len = std::fs::metadata(packs.filename(n))?.len();
            pack_info.push(PackInfo { number: n, len });
        }
        let mut blobs = 0usize;
        self.index.for_each(INDEX_PAGE, &mut |_, _| blobs += 1)?;
        Ok(StoreInfo {
            root: self.root.clone(),
            max_pack_size: self.max_pack_size,
            active_pack: packs.active()?.number(),
            packs: pack_info,
            blobs,
            durable_index: self.index.is_durable(),
        })
    }

    /// Sync the active pack and close the index. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut packs = self
            .packs
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        packs.close()?;
        self.index.close()?;
        info!(root = %self.root.display(), "storage closed");
        Ok(())
    }
}

impl BlobStorage for DiskPackedStorage {
    fn receive(&self, blob_ref: &BlobRef, content: &mut dyn Read) -> StoreResult<SizedRef> {
        DiskPackedStorage::receive(self, blob_ref, content)
    }

    fn fetch(&self, blob_ref: &BlobRef) -> StoreResult<(BlobReader, u64)> {
        DiskPackedStorage::fetch(self, blob_ref)
    }

    fn stat_blobs(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedRef>> {
        DiskPackedStorage::stat_blobs(self, refs)
    }

    fn remove_blobs(&self, refs: &[BlobRef]) -> StoreResult<()> {
        DiskPackedStorage::remove_blobs(self, refs)
    }

    fn enumerate_blobs(&self, after: Option<&BlobRef>, limit: usize) -> StoreResult<Vec<SizedRef>> {
        DiskPackedStorage::enumerate_blobs(self, after, limit)
    }

    fn close(&self) -> StoreResult<()> {
        DiskPackedStorage::close(self)
    }
}

impl std::fmt::Debug for DiskPackedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskPackedStorage")
            .field("root", &self.root)
            .field("max_pack_size", &self.max_pack_size)
            .field("durable_index", &self.index.is_durable())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
