//! Core of the Blockfile store.
//!
//! A block file is a named byte file inside a block namespace, stored as a
//! header plus fixed-size parts. This crate maps byte ranges onto parts,
//! keeps recently used files in a write-back cache, and exposes the file
//! operations through [`BlockStore`].
//!
//! # Components
//!
//! - [`PartLayout`] -- linear and circular range-to-part mapping
//! - [`BlockStore`] -- the per-file locked operations facade
//! - [`StoreConfig`] -- part size, cache capacity, background flush
//! - [`FlushReport`] -- outcome of a flush pass
//!
//! # Design Rules
//!
//! 1. Every operation on a file holds that file's lock for its whole run.
//! 2. Mutations land in the cache first; persistence happens on flush.
//! 3. A flush writes a file's parts before its header.
//! 4. Reads never populate the cache.
//! 5. Backend errors are propagated, never silently ignored.

mod cache;
pub mod config;
pub mod error;
mod flusher;
mod part_io;
pub mod partmap;
mod store;

pub use cache::FlushReport;
pub use config::{FlushConfig, StoreConfig};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use partmap::{compute_part_map, PartLayout, PartMap, PartSpan};
pub use store::BlockStore;
