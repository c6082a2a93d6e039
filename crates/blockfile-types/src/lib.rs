//! Foundation types for Blockfile.
//!
//! This crate provides the identity, header, and metadata types shared by
//! every other Blockfile crate. It performs no I/O: the header model here is
//! the pure logic for deriving `size`, timestamps, and metadata from an
//! operation, and is driven by `blockfile-core`.
//!
//! # Key Types
//!
//! - [`BlockId`] -- opaque namespace key grouping files
//! - [`FileKey`] / [`PartKey`] -- row identities for headers and parts
//! - [`BlockFile`] -- file header: size, ring cursor, timestamps, opts, meta
//! - [`FileOpts`] -- immutable creation options (circular, max size, ijson)
//! - [`MetaValue`] / [`FileMeta`] -- closed scalar metadata values

pub mod error;
pub mod file;
pub mod id;
pub mod meta;
pub mod temporal;

pub use error::TypeError;
pub use file::{BlockFile, FileOpts};
pub use id::{BlockId, FileKey, PartKey, MAX_ID_LEN};
pub use meta::{meta_from_json, validate_meta, FileMeta, MetaValue};
pub use temporal::{next_mod_ts, now_ms};
