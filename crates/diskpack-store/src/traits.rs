use std::io::Read;

use diskpack_types::{BlobRef, SizedRef};

use crate::error::StoreResult;
use crate::reader::BlobReader;

/// The outward contract of a blob storage engine.
///
/// Implementations must satisfy these invariants:
/// - At most one live copy per ref: receiving a ref whose stored copy is
///   intact writes nothing.
/// - The index is updated only after the record's bytes are appended.
/// - Removing an absent ref is not an error.
/// - Enumeration is ascending by ref and exclusive of `after`.
///
/// Refs are opaque; no digest of the content is checked.
pub trait BlobStorage: Send + Sync {
    /// Store `content` under `blob_ref` and report its size.
    fn receive(&self, blob_ref: &BlobRef, content: &mut dyn Read) -> StoreResult<SizedRef>;

    /// Open a reader over the content of `blob_ref`.
    ///
    /// Returns `StoreError::NotFound` if the ref is not indexed.
    fn fetch(&self, blob_ref: &BlobRef) -> StoreResult<(BlobReader, u64)>;

    /// Sizes of those `refs` that are present, in request order.
    fn stat_blobs(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedRef>>;

    /// Drop the index entries for `refs`. Pack bytes are left in place.
    fn remove_blobs(&self, refs: &[BlobRef]) -> StoreResult<()>;

    /// Up to `limit` blobs strictly after `after`, ascending by ref.
    fn enumerate_blobs(&self, after: Option<&BlobRef>, limit: usize) -> StoreResult<Vec<SizedRef>>;

    /// Flush and release every open file. Later calls fail with `Closed`.
    fn close(&self) -> StoreResult<()>;

    /// Read the whole content of `blob_ref` into memory.
    fn fetch_bytes(&self, blob_ref: &BlobRef) -> StoreResult<Vec<u8>> {
        let (mut reader, size) = self.fetch(blob_ref)?;
        let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Whether `blob_ref` is currently indexed.
    fn contains(&self, blob_ref: &BlobRef) -> StoreResult<bool> {
        Ok(!self.stat_blobs(std::slice::from_ref(blob_ref))?.is_empty())
    }
}
