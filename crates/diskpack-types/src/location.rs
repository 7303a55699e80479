use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical position of a blob record.
///
/// `offset` is where the record's frame header begins inside pack file
/// `pack`; `size` is the length of the blob content only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocation {
    pub pack: u32,
    pub offset: u64,
    pub size: u64,
}

impl BlobLocation {
    pub fn new(pack: u32, offset: u64, size: u64) -> Self {
        Self { pack, offset, size }
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pack {} @ {} ({} bytes)", self.pack, self.offset, self.size)
    }
}
