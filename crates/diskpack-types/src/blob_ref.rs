use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Longest ref, in bytes, that fits in a pack record header.
pub const MAX_REF_LEN: usize = 1024;

/// Opaque identifier for a stored blob.
///
/// A `BlobRef` is normally a content digest such as `sha1-...` or
/// `blake3-...`, but the storage engine never interprets it: equality and
/// ordering are purely syntactic. Ordering is byte-lexicographic on the
/// string form, which is exactly `str`'s ordering.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobRef(String);

impl BlobRef {
    /// Validate and wrap a ref string.
    pub fn new(s: impl Into<String>) -> Result<Self, TypeError> {
        let s = s.into();
        if s.is_empty() {
            return Err(TypeError::EmptyRef);
        }
        if s.len() > MAX_REF_LEN {
            return Err(TypeError::RefTooLong {
                len: s.len(),
                max: MAX_REF_LEN,
            });
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TypeError::InvalidRefChar(s));
        }
        Ok(Self(s))
    }

    /// Parse a ref from raw bytes as found in a pack record header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        let s = std::str::from_utf8(bytes).map_err(|_| TypeError::InvalidUtf8)?;
        Self::new(s)
    }

    /// Build a `blake3-<hex>` ref for `data`.
    ///
    /// Convenience for callers; the storage engine itself never hashes.
    pub fn blake3_of(data: &[u8]) -> Self {
        Self(format!("blake3-{}", hex::encode(blake3::hash(data).as_bytes())))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the canonical string form in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; an empty ref cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The part before the first `-`, e.g. `sha1` for `sha1-abcd`.
    pub fn digest_name(&self) -> Option<&str> {
        self.0.split_once('-').map(|(name, _)| name)
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.0)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobRef {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BlobRef {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BlobRef> for String {
    fn from(r: BlobRef) -> Self {
        r.0
    }
}

impl AsRef<str> for BlobRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A blob reference together with the length of its content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SizedRef {
    pub blob_ref: BlobRef,
    pub size: u64,
}

impl SizedRef {
    pub fn new(blob_ref: BlobRef, size: u64) -> Self {
        Self { blob_ref, size }
    }
}

impl fmt::Display for SizedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.blob_ref, self.size)
    }
}
