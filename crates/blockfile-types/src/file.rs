use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::{BlockId, FileKey};
use crate::meta::FileMeta;
use crate::temporal::{next_mod_ts, now_ms};

/// Creation-time options of a file. Immutable for the life of the file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOpts {
    /// Ring capacity in bytes. Only meaningful (and required) for circular files.
    #[serde(default)]
    pub max_size: u64,
    /// Bounded ring-buffer layout: writes past `max_size` overwrite the oldest data.
    #[serde(default)]
    pub circular: bool,
    /// Content is interpreted as JSON. Affects validation only, not layout.
    #[serde(default)]
    pub ijson: bool,
}

impl FileOpts {
    /// Options for a circular file holding at most `max_size` bytes.
    pub fn circular(max_size: u64) -> Self {
        Self {
            max_size,
            circular: true,
            ijson: false,
        }
    }

    /// Check these options against the store's part size.
    pub fn validate(&self, part_size: u64) -> Result<(), TypeError> {
        if self.circular {
            if self.max_size == 0 {
                return Err(TypeError::InvalidOpts(
                    "circular file requires a positive max_size".into(),
                ));
            }
            if part_size == 0 || self.max_size % part_size != 0 {
                return Err(TypeError::InvalidOpts(format!(
                    "max_size {} is not a multiple of the part size {part_size}",
                    self.max_size
                )));
            }
            if self.ijson {
                return Err(TypeError::InvalidOpts(
                    "circular files cannot hold ijson content".into(),
                ));
            }
        } else if self.max_size != 0 {
            return Err(TypeError::InvalidOpts(
                "max_size only applies to circular files".into(),
            ));
        }
        Ok(())
    }

    /// Number of ring slots, for circular files.
    pub fn num_parts(&self, part_size: u64) -> Option<u64> {
        if self.circular && part_size > 0 {
            Some(self.max_size / part_size)
        } else {
            None
        }
    }
}

/// File header: everything about a file except its content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockFile {
    pub block_id: BlockId,
    pub name: String,
    /// Logical content length.
    pub size: u64,
    /// Total bytes ever written for circular files; mirrors `size` otherwise.
    #[serde(default)]
    pub write_cursor: u64,
    /// Creation time, ms since epoch.
    pub created_ts: i64,
    /// Last content or metadata mutation, ms since epoch.
    pub mod_ts: i64,
    pub opts: FileOpts,
    #[serde(default)]
    pub meta: FileMeta,
}

impl BlockFile {
    /// A fresh, empty header with `created_ts == mod_ts == now`.
    pub fn new(key: FileKey, opts: FileOpts) -> Self {
        let now = now_ms();
        Self {
            block_id: key.block_id,
            name: key.name,
            size: 0,
            write_cursor: 0,
            created_ts: now,
            mod_ts: now,
            opts,
            meta: FileMeta::new(),
        }
    }

    pub fn key(&self) -> FileKey {
        FileKey {
            block_id: self.block_id.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_circular(&self) -> bool {
        self.opts.circular
    }

    /// Absolute write position of logical offset 0.
    ///
    /// Zero for linear files; for a circular file that has wrapped, the
    /// position of the oldest byte still held by the ring.
    pub fn logical_start(&self) -> u64 {
        if self.opts.circular {
            self.write_cursor - self.size
        } else {
            0
        }
    }

    /// Record a write of `len` bytes at absolute position `offset` and
    /// return the new size.
    pub fn apply_write(&mut self, offset: u64, len: u64) -> u64 {
        let end = offset.saturating_add(len);
        if self.opts.circular {
            self.write_cursor = self.write_cursor.max(end);
            self.size = self.opts.max_size.min(self.size.max(self.write_cursor));
        } else {
            self.size = self.size.max(end);
            self.write_cursor = self.size;
        }
        self.touch();
        self.size
    }

    /// Apply a metadata update.
    ///
    /// With `merge == false` the map is replaced by the non-null entries of
    /// `updates`. With `merge == true` null entries delete their key and all
    /// others are set.
    pub fn apply_meta_merge(&mut self, updates: FileMeta, merge: bool) -> &FileMeta {
        if !merge {
            self.meta.clear();
        }
        for (key, value) in updates {
            if value.is_null() {
                self.meta.remove(&key);
            } else {
                self.meta.insert(key, value);
            }
        }
        self.touch();
        &self.meta
    }

    fn touch(&mut self) {
        self.mod_ts = next_mod_ts(self.mod_ts);
    }
}
