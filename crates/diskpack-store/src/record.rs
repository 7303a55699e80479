//! Pack record framing.
//!
//! Each blob is stored as one self-describing frame:
//!
//! ```text
//! [ref_len : u16 big-endian]
//! [ref     : ref_len bytes, UTF-8]
//! [size    : u64 big-endian]
//! [content : size bytes]
//! ```
//!
//! A frame is always written with a single append, so a crash can only
//! leave the last frame of a pack incomplete.

use std::io::{self, Read};

use diskpack_types::{BlobRef, MAX_REF_LEN};

/// Bytes used by the two length fields of a header.
pub const FIXED_HEADER_LEN: u64 = 2 + 8;

/// Header length for a record naming `blob_ref`.
pub fn header_len(blob_ref: &BlobRef) -> u64 {
    FIXED_HEADER_LEN + blob_ref.len() as u64
}

/// Total on-disk length of a record naming `blob_ref` with `size` content bytes.
pub fn frame_len(blob_ref: &BlobRef, size: u64) -> u64 {
    header_len(blob_ref) + size
}

/// Encode the header that precedes `size` bytes of content.
pub fn encode_header(blob_ref: &BlobRef, size: u64) -> Vec<u8> {
    let ref_bytes = blob_ref.as_str().as_bytes();
    let mut buf = Vec::with_capacity(FIXED_HEADER_LEN as usize + ref_bytes.len());
    // BlobRef construction caps the length at MAX_REF_LEN, well inside u16.
    buf.extend_from_slice(&(ref_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(ref_bytes);
    buf.extend_from_slice(&size.to_be_bytes());
    buf
}

/// A decoded record header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub blob_ref: BlobRef,
    pub size: u64,
}

impl RecordHeader {
    pub fn header_len(&self) -> u64 {
        header_len(&self.blob_ref)
    }

    pub fn frame_len(&self) -> u64 {
        frame_len(&self.blob_ref, self.size)
    }
}

/// Outcome of decoding the frame at some offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete frame whose content fits in the remaining bytes.
    Record(RecordHeader),
    /// Bytes that cannot be a complete frame.
    Malformed(String),
}

/// Decode the header at the reader's position.
///
/// `remaining` is the number of file bytes from the reader's position to
/// the end of the file; a frame whose declared lengths exceed it is
/// reported as [`Frame::Malformed`]. On success the reader is left at the
/// first content byte. I/O failures other than a short read are returned
/// as errors.
pub fn read_frame<R: Read>(reader: &mut R, remaining: u64) -> io::Result<Frame> {
    if remaining < 2 {
        return Ok(Frame::Malformed(format!(
            "{remaining} trailing bytes, too short for a header"
        )));
    }
    let mut len_buf = [0u8; 2];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(Frame::Malformed("truncated ref length".into()));
    }
    let ref_len = u16::from_be_bytes(len_buf) as u64;
    if ref_len == 0 || ref_len > MAX_REF_LEN as u64 {
        return Ok(Frame::Malformed(format!("invalid ref length {ref_len}")));
    }
    if remaining < FIXED_HEADER_LEN + ref_len {
        return Ok(Frame::Malformed(format!(
            "header needs {} bytes, {remaining} remain",
            FIXED_HEADER_LEN + ref_len
        )));
    }

    let mut ref_buf = vec![0u8; ref_len as usize];
    if !read_or_eof(reader, &mut ref_buf)? {
        return Ok(Frame::Malformed("truncated ref".into()));
    }
    let blob_ref = match BlobRef::from_bytes(&ref_buf) {
        Ok(r) => r,
        Err(e) => return Ok(Frame::Malformed(format!("bad ref: {e}"))),
    };

    let mut size_buf = [0u8; 8];
    if !read_or_eof(reader, &mut size_buf)? {
        return Ok(Frame::Malformed("truncated content length".into()));
    }
    let size = u64::from_be_bytes(size_buf);
    let available = remaining - FIXED_HEADER_LEN - ref_len;
    if size > available {
        return Ok(Frame::Malformed(format!(
            "{blob_ref} declares {size} content bytes, {available} remain"
        )));
    }

    Ok(Frame::Record(RecordHeader { blob_ref, size }))
}

/// `read_exact` that reports a short read as `Ok(false)`.
fn read_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
