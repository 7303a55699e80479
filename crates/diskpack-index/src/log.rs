//! Durable, log-structured blob index.
//!
//! Every mutation is appended to a single log file as one framed op. On
//! open the log is replayed front-to-back into an in-memory sorted map;
//! reads never touch the disk.
//!
//! On-disk frame:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized LogOp)]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use diskpack_types::{BlobLocation, BlobRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IndexError, IndexResult};
use crate::memory::range_after;
use crate::traits::SortedIndex;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Dead ops tolerated beyond twice the live entry count before the log is
/// rewritten at open.
const COMPACT_SLACK: u64 = 1024;

/// Default file name of the index log inside the storage root.
pub const DEFAULT_LOG_FILE: &str = "index.log";

/// Flush/sync strategy for appended ops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Flush to the OS and rely on page-cache buffering.
    #[default]
    OsDefault,
}

/// One mutation as stored in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LogOp {
    Set {
        blob_ref: BlobRef,
        location: BlobLocation,
    },
    Delete {
        blob_ref: BlobRef,
    },
    Watermark {
        pack: u32,
        end: u64,
    },
}

struct LogState {
    entries: BTreeMap<BlobRef, BlobLocation>,
    watermarks: HashMap<u32, u64>,
    /// `None` once the index has been closed.
    writer: Option<BufWriter<File>>,
    /// Ops currently in the log file, live or superseded.
    ops: u64,
}

impl LogState {
    fn apply(&mut self, op: LogOp) {
        match op {
            LogOp::Set { blob_ref, location } => {
                self.entries.insert(blob_ref, location);
            }
            LogOp::Delete { blob_ref } => {
                self.entries.remove(&blob_ref);
            }
            LogOp::Watermark { pack, end } => {
                self.watermarks.insert(pack, end);
            }
        }
    }

    fn needs_compaction(&self) -> bool {
        let live = (self.entries.len() + self.watermarks.len()) as u64;
        self.ops > live * 2 + COMPACT_SLACK
    }
}

/// Log-structured implementation of [`SortedIndex`].
///
/// Writers append the op to the log before applying it to the in-memory
/// map, so a failed append never becomes visible.
pub struct LogIndex {
    path: PathBuf,
    sync_mode: SyncMode,
    state: RwLock<LogState>,
}

impl LogIndex {
    /// Open (or create) the index log at `path` and replay it.
    pub fn open(path: &Path, sync_mode: SyncMode) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|source| IndexError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut state = LogState {
            entries: BTreeMap::new(),
            watermarks: HashMap::new(),
            writer: None,
            ops: 0,
        };
        let valid_end = replay(&file, &mut state)?;

        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            warn!(
                path = %path.display(),
                valid_end,
                file_len,
                "torn tail in index log; truncating"
            );
            file.set_len(valid_end)?;
        }
        state.writer = Some(BufWriter::new(file));

        let index = Self {
            path: path.to_path_buf(),
            sync_mode,
            state: RwLock::new(state),
        };

        let (entries, ops, compact) = {
            let state = index.read_state()?;
            (state.entries.len(), state.ops, state.needs_compaction())
        };
        info!(path = %path.display(), entries, ops, "index log opened");
        if compact {
            index.compact()?;
        }
        Ok(index)
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite the log so it holds exactly one op per live entry and
    /// watermark.
    pub fn compact(&self) -> IndexResult<()> {
        let mut state = self.write_state()?;
        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
        }

        let tmp_path = self.path.with_extension("log.tmp");
        let mut ops = 0u64;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for (blob_ref, location) in &state.entries {
                let op = LogOp::Set {
                    blob_ref: blob_ref.clone(),
                    location: *location,
                };
                tmp.write_all(&encode_frame(&op)?)?;
                ops += 1;
            }
            let mut packs: Vec<_> = state.watermarks.iter().map(|(p, e)| (*p, *e)).collect();
            packs.sort_unstable();
            for (pack, end) in packs {
                tmp.write_all(&encode_frame(&LogOp::Watermark { pack, end })?)?;
                ops += 1;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        debug!(before = state.ops, after = ops, "index log compacted");
        state.ops = ops;
        state.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn read_state(&self) -> IndexResult<RwLockReadGuard<'_, LogState>> {
        let state = self
            .state
            .read()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        if state.writer.is_none() {
            return Err(IndexError::Closed);
        }
        Ok(state)
    }

    fn write_state(&self) -> IndexResult<RwLockWriteGuard<'_, LogState>> {
        let state = self
            .state
            .write()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        if state.writer.is_none() {
            return Err(IndexError::Closed);
        }
        Ok(state)
    }

    /// Append `op` to the log, then apply it in memory.
    fn commit(&self, state: &mut LogState, op: LogOp) -> IndexResult<()> {
        let frame = encode_frame(&op)?;
        let writer = state.writer.as_mut().ok_or(IndexError::Closed)?;
        writer.write_all(&frame)?;
        writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            writer.get_ref().sync_data()?;
        }
        state.ops += 1;
        state.apply(op);
        Ok(())
    }
}

impl SortedIndex for LogIndex {
    fn get(&self, blob_ref: &BlobRef) -> IndexResult<Option<BlobLocation>> {
        Ok(self.read_state()?.entries.get(blob_ref).copied())
    }

    fn set(&self, blob_ref: &BlobRef, location: BlobLocation) -> IndexResult<()> {
        let mut state = self.write_state()?;
        let op = LogOp::Set {
            blob_ref: blob_ref.clone(),
            location,
        };
        self.commit(&mut state, op)
    }

    fn delete(&self, blob_ref: &BlobRef) -> IndexResult<bool> {
        let mut state = self.write_state()?;
        if !state.entries.contains_key(blob_ref) {
            return Ok(false);
        }
        let op = LogOp::Delete {
            blob_ref: blob_ref.clone(),
        };
        self.commit(&mut state, op)?;
        Ok(true)
    }

    fn enumerate(
        &self,
        after: Option<&BlobRef>,
        limit: usize,
    ) -> IndexResult<Vec<(BlobRef, BlobLocation)>> {
        Ok(range_after(&self.read_state()?.entries, after, limit))
    }

    fn watermark(&self, pack: u32) -> IndexResult<Option<u64>> {
        Ok(self.read_state()?.watermarks.get(&pack).copied())
    }

    fn set_watermark(&self, pack: u32, end: u64) -> IndexResult<()> {
        let mut state = self.write_state()?;
        if state.watermarks.get(&pack) == Some(&end) {
            return Ok(());
        }
        self.commit(&mut state, LogOp::Watermark { pack, end })
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn close(&self) -> IndexResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::Poisoned(e.to_string()))?;
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            debug!(path = %self.path.display(), "index log closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIndex")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

fn encode_frame(op: &LogOp) -> IndexResult<Vec<u8>> {
    let payload = bincode::serialize(op).map_err(|e| IndexError::Serialization(e.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Replay every intact op into `state`. Returns the offset just past the
/// last complete frame.
///
/// Frames that fail the CRC check or do not deserialize are skipped; a
/// frame whose length runs past the end of the file stops the replay.
fn replay(file: &File, state: &mut LogState) -> IndexResult<u64> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid index log entry length; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(offset, "truncated index log entry; stopping replay");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        offset += HEADER_SIZE as u64 + length as u64;
        state.ops += 1;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch in index log; skipping entry"
            );
            continue;
        }

        match bincode::deserialize::<LogOp>(&payload) {
            Ok(op) => state.apply(op),
            Err(e) => warn!(offset, error = %e, "undecodable index log entry; skipping"),
        }
    }

    debug!(ops = state.ops, valid_end = offset, "index log replayed");
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use std::io::{Seek, SeekFrom};

    fn r(s: &str) -> BlobRef {
        BlobRef::new(s).unwrap()
    }

    #[test]
    fn conformance_suite() {
        let dir = tempfile::tempdir().unwrap();
        let idx = LogIndex::open(&dir.path().join("index.log"), SyncMode::default()).unwrap();
        conformance::check_sorted_index(&idx);
    }

    #[test]
    fn conformance_suite_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let idx = LogIndex::open(&dir.path().join("index.log"), SyncMode::EveryWrite).unwrap();
        conformance::check_sorted_index(&idx);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.log");

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert!(idx.is_durable());
        idx.set(&r("sha1-a"), BlobLocation::new(0, 0, 10)).unwrap();
        idx.set(&r("sha1-b"), BlobLocation::new(0, 30, 20)).unwrap();
        idx.set(&r("sha1-b"), BlobLocation::new(1, 0, 20)).unwrap();
        idx.delete(&r("sha1-a")).unwrap();
        idx.set_watermark(1, 50).unwrap();
        idx.close().unwrap();

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(idx.get(&r("sha1-a")).unwrap(), None);
        assert_eq!(idx.get(&r("sha1-b")).unwrap(), Some(BlobLocation::new(1, 0, 20)));
        assert_eq!(idx.watermark(1).unwrap(), Some(50));
        assert_eq!(idx.watermark(0).unwrap(), None);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.log");

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        idx.set(&r("sha1-a"), BlobLocation::new(0, 0, 10)).unwrap();
        idx.set(&r("sha1-b"), BlobLocation::new(0, 30, 10)).unwrap();
        idx.close().unwrap();

        let full_len = fs::metadata(&path).unwrap().len();
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(full_len - 3).unwrap();
        }

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert!(idx.get(&r("sha1-a")).unwrap().is_some());
        assert!(idx.get(&r("sha1-b")).unwrap().is_none());

        // New ops land after the truncated tail and replay cleanly.
        idx.set(&r("sha1-c"), BlobLocation::new(0, 60, 10)).unwrap();
        idx.close().unwrap();
        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert!(idx.get(&r("sha1-c")).unwrap().is_some());
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn crc_mismatch_skips_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.log");

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        idx.set(&r("sha1-a"), BlobLocation::new(0, 0, 10)).unwrap();
        idx.set(&r("sha1-b"), BlobLocation::new(0, 30, 10)).unwrap();
        idx.close().unwrap();

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert!(idx.get(&r("sha1-a")).unwrap().is_none());
        assert!(idx.get(&r("sha1-b")).unwrap().is_some());
    }

    #[test]
    fn compact_preserves_state_and_shrinks_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.log");

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        for i in 0..200u64 {
            idx.set(&r("sha1-hot"), BlobLocation::new(0, i * 40, 10)).unwrap();
        }
        idx.set(&r("sha1-cold"), BlobLocation::new(0, 9000, 5)).unwrap();
        idx.set_watermark(0, 9100).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        idx.compact().unwrap();
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before);
        assert_eq!(
            idx.get(&r("sha1-hot")).unwrap(),
            Some(BlobLocation::new(0, 199 * 40, 10))
        );

        // Still appendable after compaction.
        idx.set(&r("sha1-new"), BlobLocation::new(1, 0, 1)).unwrap();
        idx.close().unwrap();

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.watermark(0).unwrap(), Some(9100));
    }

    #[test]
    fn open_compacts_bloated_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.log");

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        for i in 0..(COMPACT_SLACK + 10) {
            idx.set(&r("sha1-x"), BlobLocation::new(0, i, 1)).unwrap();
        }
        idx.close().unwrap();
        let before = fs::metadata(&path).unwrap().len();

        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();
        assert!(fs::metadata(&path).unwrap().len() < before);
        assert_eq!(
            idx.get(&r("sha1-x")).unwrap(),
            Some(BlobLocation::new(0, COMPACT_SLACK + 9, 1))
        );
    }

    #[test]
    fn delete_of_absent_ref_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.log");
        let idx = LogIndex::open(&path, SyncMode::default()).unwrap();

        assert!(!idx.delete(&r("sha1-missing")).unwrap());
        idx.set_watermark(0, 0).unwrap();
        let len = fs::metadata(&path).unwrap().len();
        idx.set_watermark(0, 0).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
    }
}
