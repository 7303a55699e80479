//! Pack-file blob storage for diskpack.
//!
//! Blobs are appended to numbered pack files as self-describing records
//! and located through a pluggable sorted index (see `diskpack-index`).
//! The engine stores at most one live copy per ref, rotates to a new pack
//! once the active one reaches its size limit, and reconciles the index
//! with the packs on every open.
//!
//! # Storage Layout
//!
//! ```text
//! <root>/pack-00000.blobs
//! <root>/pack-00001.blobs      <- highest number is the active pack
//! <root>/index.log             <- default durable index backend
//! ```
//!
//! # Engine
//!
//! [`DiskPackedStorage`] implements the [`BlobStorage`] contract:
//!
//! - `receive` -- append a blob unless an intact copy is already stored
//! - `fetch` -- stream a blob's content through a [`BlobReader`]
//! - `stat_blobs`, `enumerate_blobs` -- index lookups, ascending by ref
//! - `remove_blobs` -- drop index entries; pack bytes stay in place
//! - `next_pack`, `reindex`, `verify_packs` -- administrative operations
//!
//! # Design Rules
//!
//! 1. Pack files are append-only; each record is written with one append.
//! 2. The index is updated only after the record's bytes are on disk.
//! 3. Receive and remove are serialized through one engine-wide lock.
//! 4. A malformed trailing frame is logged and left in place, never
//!    truncated; new records go to a fresh pack instead.
//! 5. Refs are opaque; the engine never hashes content.

pub mod cancel;
pub mod config;
pub mod error;
pub mod pack_set;
pub mod reader;
pub mod record;
pub mod recovery;
pub mod storage;
pub mod traits;
pub mod writer;

pub use cancel::CancelToken;
pub use config::{StoreConfig, DEFAULT_MAX_PACK_SIZE};
pub use error::{StoreError, StoreResult};
pub use pack_set::{pack_filename, PackSet};
pub use reader::BlobReader;
pub use recovery::{PackScan, RecoveryReport, ReindexMode};
pub use storage::{DiskPackedStorage, PackInfo, StoreInfo};
pub use traits::BlobStorage;
