//! Sorted blob index for diskpack.
//!
//! The storage engine keeps exactly one live index entry per blob ref,
//! mapping it to the pack file, offset, and size of its record. This crate
//! defines the backend contract and ships two interchangeable backends.
//!
//! # Modules
//!
//! - [`error`] -- Error types for index operations
//! - [`traits`] -- The [`SortedIndex`] trait every backend implements
//! - [`memory`] -- Ephemeral [`MemoryIndex`]
//! - [`log`] -- Durable, log-structured [`LogIndex`]
//! - [`config`] -- [`IndexConfig`] and [`open_index`] for backend selection
//! - `conformance` -- shared test suite run against every backend
//!   (enabled under `cfg(test)` or the `conformance` feature)

pub mod config;
pub mod error;
pub mod log;
pub mod memory;
pub mod traits;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

pub use config::{open_index, IndexConfig};
pub use error::{IndexError, IndexResult};
pub use log::{LogIndex, SyncMode, DEFAULT_LOG_FILE};
pub use memory::MemoryIndex;
pub use traits::SortedIndex;
