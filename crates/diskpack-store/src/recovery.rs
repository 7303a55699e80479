//! Startup recovery: reconcile the index with what the pack files hold.
//!
//! For each pack, everything before the index's validated end is trusted:
//! the recorded watermark when there is one, otherwise the end of the
//! last indexed record.
//! Bytes past it are parsed forward, frame by frame, and every complete
//! record is (re)indexed. The scan stops at the first frame that cannot
//! be complete; those bytes are the tail of an interrupted write and are
//! left on disk untouched.
//!
//! Re-running recovery is idempotent: it only ever writes the same entries
//! and watermarks again.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::Path;

use diskpack_index::SortedIndex;
use diskpack_types::{BlobLocation, BlobRef};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::pack_set::PackSet;
use crate::record::{frame_len, read_frame, Frame};

/// Page size used when walking the index.
const INDEX_PAGE: usize = 1024;

/// How much of each pack to rescan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReindexMode {
    /// Only bytes past the index's validated end of each pack.
    #[default]
    Incremental,
    /// Every pack from offset 0. Removed blobs whose bytes are still on
    /// disk become indexed again.
    Full,
}

/// Summary of one recovery pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub packs_scanned: usize,
    pub records_indexed: usize,
    pub garbage_bytes: u64,
    /// Packs ending in a malformed frame or shorter than their indexed
    /// contents.
    pub damaged_packs: Vec<u32>,
    /// Packs the index knows about whose files are gone. Their watermarks
    /// are reset so a recreated file is scanned from the start.
    pub missing_packs: Vec<u32>,
}

/// A complete record found while scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedRecord {
    pub blob_ref: BlobRef,
    pub location: BlobLocation,
}

/// Result of scanning one pack from some start offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackScan {
    pub pack: u32,
    pub start: u64,
    pub file_len: u64,
    /// Offset just past the last complete record.
    pub valid_end: u64,
    pub records: usize,
    /// Why the scan stopped early, if it did.
    pub malformed: Option<String>,
}

impl PackScan {
    /// Trailing bytes that do not form a complete record.
    pub fn garbage_bytes(&self) -> u64 {
        self.file_len.saturating_sub(self.valid_end)
    }
}

/// Parse records of pack `pack` at `path` starting at `start`, handing each
/// complete one to `on_record`.
pub fn scan_pack(
    path: &Path,
    pack: u32,
    start: u64,
    mut on_record: impl FnMut(ScannedRecord) -> StoreResult<()>,
) -> StoreResult<PackScan> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut scan = PackScan {
        pack,
        start,
        file_len,
        valid_end: start.min(file_len),
        records: 0,
        malformed: None,
    };
    if start >= file_len {
        return Ok(scan);
    }

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start))?;
    let mut offset = start;

    while offset < file_len {
        match read_frame(&mut reader, file_len - offset)? {
            Frame::Record(header) => {
                let content_start = offset + header.header_len();
                reader.seek(SeekFrom::Start(content_start + header.size))?;
                let record = ScannedRecord {
                    location: BlobLocation::new(pack, offset, header.size),
                    blob_ref: header.blob_ref,
                };
                offset += frame_len(&record.blob_ref, record.location.size);
                on_record(record)?;
                scan.records += 1;
                scan.valid_end = offset;
            }
            Frame::Malformed(reason) => {
                scan.malformed = Some(reason);
                break;
            }
        }
    }
    Ok(scan)
}

/// Greatest indexed record end per pack.
fn indexed_ends(index: &dyn SortedIndex) -> StoreResult<HashMap<u32, u64>> {
    let mut ends: HashMap<u32, u64> = HashMap::new();
    index.for_each(INDEX_PAGE, &mut |blob_ref, loc| {
        let end = loc.offset + frame_len(blob_ref, loc.size);
        let slot = ends.entry(loc.pack).or_insert(0);
        *slot = (*slot).max(end);
    })?;
    Ok(ends)
}

/// Reset the watermark of every pack the index remembers but whose file
/// is gone. Entries pointing into such a pack are left alone; a later
/// receive of the same ref rewrites them.
fn forget_missing_packs(
    on_disk: &[u32],
    ends: &HashMap<u32, u64>,
    index: &dyn SortedIndex,
    report: &mut RecoveryReport,
) -> StoreResult<()> {
    let highest = on_disk
        .iter()
        .chain(ends.keys())
        .copied()
        .max()
        .unwrap_or(0);
    // One past the highest known pack catches a removed active pack.
    for pack in 0..=highest.saturating_add(1) {
        if on_disk.binary_search(&pack).is_ok() {
            continue;
        }
        if let Some(end) = index.watermark(pack)? {
            if end > 0 {
                warn!(pack, validated = end, "pack file is missing; resetting its watermark");
                index.set_watermark(pack, 0)?;
                report.missing_packs.push(pack);
            }
        }
    }
    Ok(())
}

/// Bring `index` up to date with every pack in `packs`.
pub fn recover(
    packs: &PackSet,
    index: &dyn SortedIndex,
    mode: ReindexMode,
) -> StoreResult<RecoveryReport> {
    let numbers = packs.list()?;
    let ends = match mode {
        ReindexMode::Incremental => indexed_ends(index)?,
        ReindexMode::Full => HashMap::new(),
    };

    let mut report = RecoveryReport::default();
    forget_missing_packs(&numbers, &ends, index, &mut report)?;

    for pack in numbers {
        let path = packs.filename(pack);
        let start = match mode {
            ReindexMode::Incremental => match index.watermark(pack)? {
                Some(end) => end,
                None => ends.get(&pack).copied().unwrap_or(0),
            },
            ReindexMode::Full => 0,
        };

        let file_len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if file_len < start {
            warn!(
                pack,
                file_len,
                validated = start,
                "pack is shorter than its indexed contents"
            );
            report.damaged_packs.push(pack);
            continue;
        }
        if file_len == start {
            continue;
        }

        debug!(pack, start, file_len, "scanning pack for unindexed records");
        let scan = scan_pack(&path, pack, start, |record| {
            index.set(&record.blob_ref, record.location)?;
            Ok(())
        })?;
        report.packs_scanned += 1;
        report.records_indexed += scan.records;

        if let Some(reason) = &scan.malformed {
            report.garbage_bytes += scan.garbage_bytes();
            report.damaged_packs.push(pack);
            warn!(
                pack,
                offset = scan.valid_end,
                garbage = scan.garbage_bytes(),
                reason = %reason,
                "malformed trailing frame; leaving bytes in place"
            );
        }
        index.set_watermark(pack, scan.valid_end)?;
    }

    info!(
        packs_scanned = report.packs_scanned,
        records_indexed = report.records_indexed,
        garbage_bytes = report.garbage_bytes,
        durable_index = index.is_durable(),
        "recovery complete"
    );
    Ok(report)
}
