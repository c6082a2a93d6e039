use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Longest block id or file name, in bytes. Hex-encoded, it still fits a
/// 255-byte path component.
pub const MAX_ID_LEN: usize = 127;

/// Opaque namespace key grouping files (typically a UUID string).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    /// Wrap an existing key. Fails on an empty string or one longer than
    /// [`MAX_ID_LEN`] bytes.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::InvalidBlockId("empty block id".into()));
        }
        if id.len() > MAX_ID_LEN {
            return Err(TypeError::InvalidBlockId(format!(
                "block id of {} bytes exceeds {MAX_ID_LEN}",
                id.len()
            )));
        }
        Ok(Self(id))
    }

    /// Generate a fresh time-ordered block id (UUID v7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlockId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for BlockId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a file: the (block, name) pair. Names are unique among live
/// files of a block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub block_id: BlockId,
    pub name: String,
}

impl FileKey {
    pub fn new(block_id: BlockId, name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidName("empty file name".into()));
        }
        if name.len() > MAX_ID_LEN {
            return Err(TypeError::InvalidName(format!(
                "name of {} bytes exceeds {MAX_ID_LEN}",
                name.len()
            )));
        }
        Ok(Self { block_id, name })
    }

    /// Key of part `index` of this file.
    pub fn part(&self, index: u64) -> PartKey {
        PartKey {
            file: self.clone(),
            index,
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.block_id, self.name)
    }
}

/// Identity of a single part row: (block, name, part index).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartKey {
    pub file: FileKey,
    pub index: u64,
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_id_rejected() {
        assert!(BlockId::new("").is_err());
        assert!("".parse::<BlockId>().is_err());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = BlockId::generate();
        let b = BlockId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn block_id_serializes_as_plain_string() {
        let id = BlockId::new("blk-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"blk-1\"");
    }

    #[test]
    fn file_key_rejects_empty_name() {
        let block = BlockId::new("b").unwrap();
        assert!(FileKey::new(block, "").is_err());
    }

    #[test]
    fn overlong_ids_rejected() {
        let block = BlockId::new("b").unwrap();
        assert!(FileKey::new(block.clone(), "n".repeat(MAX_ID_LEN)).is_ok());
        let err = FileKey::new(block, "n".repeat(MAX_ID_LEN + 1)).unwrap_err();
        assert!(matches!(err, TypeError::InvalidName(_)));
        // Length is in bytes, not chars.
        assert!(BlockId::new("é".repeat(64)).is_err());
        assert!(BlockId::new("b".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn part_key_display() {
        let key = FileKey::new(BlockId::new("b").unwrap(), "term").unwrap();
        assert_eq!(key.part(3).to_string(), "b/term#3");
    }
}
