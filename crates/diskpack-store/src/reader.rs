//! Reading a blob back out of its pack.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use diskpack_types::{BlobLocation, BlobRef};

use crate::error::{StoreError, StoreResult};
use crate::record::{frame_len, read_frame, Frame};

/// Streams exactly the content bytes of one record.
///
/// Yields `UnexpectedEof` if the pack file ends before `size` bytes were
/// read, so a short blob is never mistaken for a complete one.
pub struct BlobReader {
    inner: BufReader<File>,
    remaining: u64,
}

impl BlobReader {
    /// Content bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pack file ended inside a record",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// Open the record for `blob_ref` at `loc` in the pack at `path`.
///
/// The frame header found there must name `blob_ref` with `loc.size`
/// content bytes, and the file must be long enough to hold the whole
/// frame. Anything else is a [`StoreError::CorruptRecord`]; a missing or
/// unreadable file is [`StoreError::Io`].
pub fn open_record(path: &Path, blob_ref: &BlobRef, loc: BlobLocation) -> StoreResult<BlobReader> {
    let corrupt = |reason: String| StoreError::CorruptRecord {
        blob_ref: blob_ref.clone(),
        pack: loc.pack,
        offset: loc.offset,
        reason,
    };

    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let end = loc
        .offset
        .checked_add(frame_len(blob_ref, loc.size))
        .ok_or_else(|| corrupt("location overflows".into()))?;
    if file_len < end {
        return Err(corrupt(format!(
            "pack is {file_len} bytes, record ends at {end}"
        )));
    }

    let mut inner = BufReader::new(file);
    inner.seek(SeekFrom::Start(loc.offset))?;
    match read_frame(&mut inner, file_len - loc.offset)? {
        Frame::Record(h) if h.blob_ref == *blob_ref && h.size == loc.size => {}
        Frame::Record(h) => {
            return Err(corrupt(format!(
                "header names {} with {} bytes",
                h.blob_ref, h.size
            )))
        }
        Frame::Malformed(reason) => return Err(corrupt(reason)),
    }

    Ok(BlobReader {
        inner,
        remaining: loc.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{encode_header, header_len};
    use std::fs::OpenOptions;
    use std::io::Write;

    fn r(s: &str) -> BlobRef {
        BlobRef::new(s).unwrap()
    }

    fn write_pack(path: &Path, records: &[(&str, &[u8])]) -> Vec<BlobLocation> {
        let mut file = File::create(path).unwrap();
        let mut offset = 0;
        let mut locs = Vec::new();
        for (name, content) in records {
            let mut frame = encode_header(&r(name), content.len() as u64);
            frame.extend_from_slice(content);
            file.write_all(&frame).unwrap();
            locs.push(BlobLocation::new(0, offset, content.len() as u64));
            offset += frame.len() as u64;
        }
        locs
    }

    #[test]
    fn reads_exact_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-00000.blobs");
        let locs = write_pack(&path, &[("sha1-a", &b"first"[..]), ("sha1-b", &b"second"[..])]);

        let mut reader = open_record(&path, &r("sha1-a"), locs[0]).unwrap();
        assert_eq!(reader.remaining(), 5);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "first");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn wrong_ref_or_size_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-00000.blobs");
        let locs = write_pack(&path, &[("sha1-a", &b"first"[..]), ("sha1-b", &b"second"[..])]);

        let err = open_record(&path, &r("sha1-b"), BlobLocation::new(0, 0, 5)).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));

        let wrong_size = BlobLocation::new(0, locs[1].offset, 2);
        let err = open_record(&path, &r("sha1-b"), wrong_size).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));
    }

    #[test]
    fn truncated_pack_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-00000.blobs");
        let locs = write_pack(&path, &[("sha1-a", &b"content"[..])]);
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(header_len(&r("sha1-a")) + 2)
            .unwrap();

        let err = open_record(&path, &r("sha1-a"), locs[0]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRecord { reason, .. } if reason.contains("record ends")
        ));
    }

    #[test]
    fn missing_pack_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-00009.blobs");
        let err = open_record(&path, &r("sha1-a"), BlobLocation::new(9, 0, 1)).unwrap_err();
        assert!(matches!(err, StoreError::Io(e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn shrinking_file_mid_read_is_unexpected_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-00000.blobs");
        let content = vec![7u8; 64 * 1024];
        let locs = write_pack(&path, &[("sha1-a", content.as_slice())]);

        let mut reader = open_record(&path, &r("sha1-a"), locs[0]).unwrap();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(header_len(&r("sha1-a")))
            .unwrap();

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
