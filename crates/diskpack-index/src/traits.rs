//! The [`SortedIndex`] trait defining the blob index interface.
//!
//! Any backend (in-memory, log-structured file, networked sorted store)
//! implements this trait to map blob references to pack locations. The
//! storage engine holds an `Arc<dyn SortedIndex>` and never depends on a
//! concrete backend.

use diskpack_types::{BlobLocation, BlobRef};

use crate::error::IndexResult;

/// Ordered mapping from [`BlobRef`] to [`BlobLocation`].
///
/// Implementations must be thread-safe (`Send + Sync`) and provide
/// read-your-writes visibility: once `set` or `delete` returns, every
/// subsequent call from any thread observes the change. Ordering is
/// byte-lexicographic on the ref's string form.
pub trait SortedIndex: Send + Sync {
    /// Look up the location of `blob_ref`.
    ///
    /// Returns `Ok(None)` if the ref is not indexed.
    fn get(&self, blob_ref: &BlobRef) -> IndexResult<Option<BlobLocation>>;

    /// Insert or overwrite the entry for `blob_ref`.
    fn set(&self, blob_ref: &BlobRef, location: BlobLocation) -> IndexResult<()>;

    /// Delete the entry for `blob_ref`.
    ///
    /// Returns `Ok(true)` if an entry existed, `Ok(false)` if it did not.
    /// Deleting an absent ref is not an error.
    fn delete(&self, blob_ref: &BlobRef) -> IndexResult<bool>;

    /// Return up to `limit` entries strictly after `after`, ascending by ref.
    ///
    /// Pass `None` to start from the first entry.
    fn enumerate(
        &self,
        after: Option<&BlobRef>,
        limit: usize,
    ) -> IndexResult<Vec<(BlobRef, BlobLocation)>>;

    /// The end of the validated region of pack `pack`, if recorded.
    ///
    /// Bytes before the watermark have been either indexed or deliberately
    /// abandoned; startup recovery only scans past it.
    fn watermark(&self, pack: u32) -> IndexResult<Option<u64>>;

    /// Record the end of the validated region of pack `pack`.
    fn set_watermark(&self, pack: u32, end: u64) -> IndexResult<()>;

    /// Whether entries survive a close and reopen.
    fn is_durable(&self) -> bool;

    /// Flush and release the backend. Later calls fail with `Closed`.
    fn close(&self) -> IndexResult<()>;

    /// Visit every entry in ascending order, `page` entries at a time.
    fn for_each(
        &self,
        page: usize,
        f: &mut dyn FnMut(&BlobRef, &BlobLocation),
    ) -> IndexResult<()> {
        let page = page.max(1);
        let mut after: Option<BlobRef> = None;
        loop {
            let batch = self.enumerate(after.as_ref(), page)?;
            for (blob_ref, loc) in &batch {
                f(blob_ref, loc);
            }
            if batch.len() < page {
                return Ok(());
            }
            after = batch.into_iter().last().map(|(r, _)| r);
        }
    }
}
