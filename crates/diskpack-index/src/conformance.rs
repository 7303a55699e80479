//! Shared conformance suite for [`SortedIndex`] backends.
//!
//! Every backend runs the same checks, so a new backend (a networked
//! sorted store, say) is validated by calling [`check_sorted_index`] on a
//! fresh, empty instance. The suite closes the index as its last step.

use diskpack_types::{BlobLocation, BlobRef};

use crate::error::IndexError;
use crate::traits::SortedIndex;

fn r(s: &str) -> BlobRef {
    BlobRef::new(s).expect("conformance refs are valid")
}

fn refs(entries: &[(BlobRef, BlobLocation)]) -> Vec<&str> {
    entries.iter().map(|(r, _)| r.as_str()).collect()
}

/// Run every check against `index`, which must start empty.
pub fn check_sorted_index(index: &dyn SortedIndex) {
    check_empty(index);
    check_set_get_overwrite(index);
    check_delete(index);
    check_enumerate_order(index);
    check_enumerate_paging(index);
    check_for_each(index);
    check_watermarks(index);
    check_close(index);
}

fn check_empty(index: &dyn SortedIndex) {
    assert_eq!(index.get(&r("sha1-missing")).unwrap(), None);
    assert!(index.enumerate(None, 10).unwrap().is_empty());
    assert!(!index.delete(&r("sha1-missing")).unwrap());
}

fn check_set_get_overwrite(index: &dyn SortedIndex) {
    let key = r("sha1-overwrite");
    index.set(&key, BlobLocation::new(0, 0, 5)).unwrap();
    assert_eq!(index.get(&key).unwrap(), Some(BlobLocation::new(0, 0, 5)));

    index.set(&key, BlobLocation::new(3, 4096, 5)).unwrap();
    assert_eq!(index.get(&key).unwrap(), Some(BlobLocation::new(3, 4096, 5)));

    let all = index.enumerate(None, 100).unwrap();
    assert_eq!(all.len(), 1, "overwrite must not duplicate the entry");

    assert!(index.delete(&key).unwrap());
}

fn check_delete(index: &dyn SortedIndex) {
    let key = r("sha1-delete");
    index.set(&key, BlobLocation::new(0, 10, 1)).unwrap();
    assert!(index.delete(&key).unwrap());
    assert_eq!(index.get(&key).unwrap(), None);
    assert!(!index.delete(&key).unwrap(), "second delete is a no-op");

    // Re-adding after delete behaves like a fresh insert.
    index.set(&key, BlobLocation::new(1, 20, 2)).unwrap();
    assert_eq!(index.get(&key).unwrap(), Some(BlobLocation::new(1, 20, 2)));
    assert!(index.delete(&key).unwrap());
}

fn check_enumerate_order(index: &dyn SortedIndex) {
    // Inserted out of order; includes an uppercase key which sorts first
    // in byte order.
    let keys = ["sha1-c", "sha1-a", "Sha1-z", "sha1-b", "sha1-aa"];
    for (i, k) in keys.iter().enumerate() {
        index.set(&r(k), BlobLocation::new(0, i as u64 * 100, 7)).unwrap();
    }

    let all = index.enumerate(None, 100).unwrap();
    assert_eq!(
        refs(&all),
        vec!["Sha1-z", "sha1-a", "sha1-aa", "sha1-b", "sha1-c"]
    );
    assert_eq!(all[1].1, BlobLocation::new(0, 100, 7));

    let after = index.enumerate(Some(&r("sha1-a")), 100).unwrap();
    assert_eq!(refs(&after), vec!["sha1-aa", "sha1-b", "sha1-c"]);

    // `after` need not be a stored key.
    let after = index.enumerate(Some(&r("sha1-ab")), 100).unwrap();
    assert_eq!(refs(&after), vec!["sha1-b", "sha1-c"]);

    let after = index.enumerate(Some(&r("sha1-c")), 100).unwrap();
    assert!(after.is_empty());

    assert!(index.enumerate(None, 0).unwrap().is_empty());

    for k in keys {
        assert!(index.delete(&r(k)).unwrap());
    }
    assert!(index.enumerate(None, 100).unwrap().is_empty());
}

fn check_enumerate_paging(index: &dyn SortedIndex) {
    for i in 0..25u64 {
        index
            .set(&r(&format!("sha1-{i:04}")), BlobLocation::new(0, i, 1))
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut after: Option<BlobRef> = None;
    loop {
        let page = index.enumerate(after.as_ref(), 10).unwrap();
        assert!(page.len() <= 10);
        if page.is_empty() {
            break;
        }
        after = page.last().map(|(r, _)| r.clone());
        seen.extend(page.into_iter().map(|(r, _)| r.to_string()));
    }
    let expected: Vec<String> = (0..25).map(|i| format!("sha1-{i:04}")).collect();
    assert_eq!(seen, expected);

    for i in 0..25u64 {
        index.delete(&r(&format!("sha1-{i:04}"))).unwrap();
    }
}

fn check_for_each(index: &dyn SortedIndex) {
    for i in 0..7u64 {
        index
            .set(&r(&format!("sha1-each-{i}")), BlobLocation::new(2, i * 10, i))
            .unwrap();
    }
    let mut total = 0;
    let mut last: Option<BlobRef> = None;
    index
        .for_each(3, &mut |blob_ref, loc| {
            if let Some(prev) = &last {
                assert!(prev < blob_ref);
            }
            last = Some(blob_ref.clone());
            total += loc.size;
        })
        .unwrap();
    assert_eq!(total, (0..7).sum::<u64>());

    for i in 0..7u64 {
        index.delete(&r(&format!("sha1-each-{i}"))).unwrap();
    }
}

fn check_watermarks(index: &dyn SortedIndex) {
    index.set_watermark(4, 1234).unwrap();
    index.set_watermark(4, 5678).unwrap();
    let mark = index.watermark(4).unwrap();
    if index.is_durable() {
        assert_eq!(mark, Some(5678));
    } else {
        assert!(mark.is_none() || mark == Some(5678));
    }
    assert_eq!(index.watermark(99).unwrap(), None);
}

fn check_close(index: &dyn SortedIndex) {
    index.close().unwrap();
    assert!(matches!(
        index.get(&r("sha1-after-close")),
        Err(IndexError::Closed)
    ));
    assert!(matches!(
        index.set(&r("sha1-after-close"), BlobLocation::new(0, 0, 0)),
        Err(IndexError::Closed)
    ));
    // Closing twice is harmless.
    index.close().unwrap();
}
