//! Appending records to the active pack file.
//!
//! A record is assembled completely in memory ([`PendingRecord`]) before
//! anything touches the disk, so a failing content source aborts with the
//! pack untouched. The assembled frame is then written with one
//! `write_all` to the tail of the active pack ([`ActivePack::append`]).

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use diskpack_index::SyncMode;
use diskpack_types::BlobRef;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::{encode_header, header_len};

/// Upper bound on the buffer reserved up front from a caller's size hint.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// A fully-read record waiting to be appended.
pub struct PendingRecord {
    blob_ref: BlobRef,
    frame: Vec<u8>,
    header_len: usize,
}

impl PendingRecord {
    /// Read all of `content` and frame it for `blob_ref`.
    ///
    /// `size_hint` only sizes the initial buffer; the recorded size is the
    /// number of bytes actually read.
    pub fn read_from<R: Read>(
        blob_ref: &BlobRef,
        mut content: R,
        size_hint: Option<u64>,
    ) -> StoreResult<Self> {
        let header_len = header_len(blob_ref) as usize;
        let reserve = size_hint.unwrap_or(0).min(MAX_PREALLOC) as usize;
        let mut frame = Vec::with_capacity(header_len + reserve);
        // Size field is patched once the content length is known.
        frame.extend_from_slice(&encode_header(blob_ref, 0));
        content.read_to_end(&mut frame)?;

        let size = (frame.len() - header_len) as u64;
        frame[header_len - 8..header_len].copy_from_slice(&size.to_be_bytes());

        Ok(Self {
            blob_ref: blob_ref.clone(),
            frame,
            header_len,
        })
    }

    pub fn blob_ref(&self) -> &BlobRef {
        &self.blob_ref
    }

    /// Content length in bytes.
    pub fn size(&self) -> u64 {
        (self.frame.len() - self.header_len) as u64
    }

    /// Total bytes the record occupies on disk.
    pub fn frame_len(&self) -> u64 {
        self.frame.len() as u64
    }
}

/// Where an appended record landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Appended {
    pub pack: u32,
    pub offset: u64,
    pub size: u64,
}

impl Appended {
    /// Offset just past the record.
    pub fn end(&self, frame_len: u64) -> u64 {
        self.offset + frame_len
    }
}

/// The pack file currently accepting appends.
pub struct ActivePack {
    number: u32,
    path: PathBuf,
    file: File,
    /// End of the last record this handle appended successfully, or the
    /// file length at open.
    len: u64,
    sync_mode: SyncMode,
}

impl ActivePack {
    /// Open (or create) pack `number` at `path` for appending.
    pub fn open(number: u32, path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|source| StoreError::PackOpen {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            number,
            path: path.to_path_buf(),
            file,
            len,
            sync_mode,
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validated length of the pack.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current length of the file on disk, which exceeds [`len`](Self::len)
    /// when something other than a successful append wrote to it.
    pub fn file_len(&self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whether the path no longer names the file this handle writes to,
    /// because it was removed or replaced.
    pub fn is_detached(&self) -> StoreResult<bool> {
        let on_disk = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        Ok(!same_file(&on_disk, &self.file.metadata()?))
    }

    /// Append `record` in one write and report where it began.
    ///
    /// On failure the recorded length is left unchanged; any bytes that
    /// did reach the file are unindexed garbage.
    pub fn append(&mut self, record: &PendingRecord) -> StoreResult<Appended> {
        // The file end, not `len`, is where an O_APPEND write lands. They
        // differ only after an earlier failed append.
        let offset = self.file.metadata()?.len();
        if offset != self.len {
            warn!(
                pack = self.number,
                validated = self.len,
                file_len = offset,
                "pack has unvalidated trailing bytes; appending after them"
            );
        }

        self.file.write_all(&record.frame)?;
        self.file.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            self.file.sync_data()?;
        }

        self.len = offset + record.frame_len();
        debug!(
            blob_ref = %record.blob_ref,
            pack = self.number,
            offset,
            size = record.size(),
            "record appended"
        );
        Ok(Appended {
            pack: self.number,
            offset,
            size: record.size(),
        })
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&self) -> StoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len()
}
