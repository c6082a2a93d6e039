//! Durable row storage for Blockfile.
//!
//! The store core treats persistence as an external collaborator reached
//! through two row kinds: file headers, keyed by (block, name), and parts,
//! keyed by (block, name, part index). This crate defines that boundary and
//! ships two implementations of it.
//!
//! # Backends
//!
//! All backends implement the [`Backend`] trait:
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based rows for tests and embedding
//! - [`FsBackend`] -- one directory per file, rows written atomically via rename
//!
//! # Contract
//!
//! 1. Every row operation is atomic for that row.
//! 2. No transaction spans multiple rows; callers order their writes.
//! 3. Missing rows are `Ok(None)`, not errors.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use fs::FsBackend;
pub use memory::InMemoryBackend;
pub use traits::Backend;
