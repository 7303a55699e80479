//! Foundation types for diskpack.
//!
//! Every other diskpack crate depends on `diskpack-types`. The types here are
//! deliberately thin: the storage engine treats a blob reference as an
//! opaque, totally-ordered string and never checks it against content.
//!
//! # Key Types
//!
//! - [`BlobRef`] -- Opaque content-digest identifier, ordered by bytes
//! - [`SizedRef`] -- A `BlobRef` paired with its content length
//! - [`BlobLocation`] -- Physical position of a record inside a pack file

pub mod blob_ref;
pub mod error;
pub mod location;

pub use blob_ref::{BlobRef, SizedRef, MAX_REF_LEN};
pub use error::TypeError;
pub use location::BlobLocation;
