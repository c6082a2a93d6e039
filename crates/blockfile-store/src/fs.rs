use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use blockfile_types::{BlockFile, BlockId, FileKey, PartKey};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::traits::Backend;

const HEADER_FILE: &str = "header.json";
const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".bin";
const TMP_SUFFIX: &str = ".tmp";

/// Frame header size: 4 bytes length + 4 bytes CRC.
const FRAME_HEADER_SIZE: usize = 8;

/// Directory-backed row store.
///
/// Layout:
/// ```text
/// <root>/<hex(block_id)>/<hex(name)>/header.json
/// <root>/<hex(block_id)>/<hex(name)>/part-<index>.bin
/// ```
///
/// Block ids and names are hex-encoded so arbitrary strings map to safe
/// path components. Every row is written to a temporary sibling and renamed
/// into place, so a reader never observes a half-written row.
///
/// Part rows are framed as:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload]
/// ```
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (or create) a backend rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "fs backend opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_dir(&self, block_id: &BlockId) -> PathBuf {
        self.root.join(hex::encode(block_id.as_str()))
    }

    fn file_dir(&self, key: &FileKey) -> PathBuf {
        self.block_dir(&key.block_id).join(hex::encode(&key.name))
    }

    fn part_path(&self, key: &PartKey) -> PathBuf {
        self.file_dir(&key.file)
            .join(format!("{PART_PREFIX}{}{PART_SUFFIX}", key.index))
    }

    async fn read_header_at(&self, path: &Path) -> BackendResult<Option<BlockFile>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `dir` if it is empty; any other state is left alone.
    async fn prune_dir(dir: &Path) {
        if let Err(e) = fs::remove_dir(dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(dir = %dir.display(), error = %e, "directory not pruned");
            }
        }
    }
}

/// Write `data` to `path` via a temporary file and rename.
async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await
}

fn encode_part(row: &str, data: &[u8]) -> BackendResult<Vec<u8>> {
    let length = u32::try_from(data.len()).map_err(|_| BackendError::Corrupt {
        row: row.to_string(),
        reason: format!("part of {} bytes exceeds frame limit", data.len()),
    })?;
    let crc = crc32fast::hash(data);
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + data.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

fn decode_part(row: &str, mut frame: Vec<u8>) -> BackendResult<Vec<u8>> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(BackendError::Corrupt {
            row: row.to_string(),
            reason: format!("frame of {} bytes is shorter than its header", frame.len()),
        });
    }
    let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let expected_crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    if frame.len() - FRAME_HEADER_SIZE != length {
        return Err(BackendError::Corrupt {
            row: row.to_string(),
            reason: format!(
                "frame declares {length} bytes, holds {}",
                frame.len() - FRAME_HEADER_SIZE
            ),
        });
    }
    let payload = frame.split_off(FRAME_HEADER_SIZE);
    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(BackendError::Corrupt {
            row: row.to_string(),
            reason: format!("CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
        });
    }
    Ok(payload)
}

fn decode_component(row: &Path, name: &str) -> Option<String> {
    match hex::decode(name).ok().and_then(|b| String::from_utf8(b).ok()) {
        Some(s) => Some(s),
        None => {
            warn!(path = %row.display(), "skipping unrecognized directory entry");
            None
        }
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn upsert_header(&self, file: &BlockFile) -> BackendResult<()> {
        let dir = self.file_dir(&file.key());
        fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec(file)?;
        write_atomic(&dir.join(HEADER_FILE), &bytes).await?;
        Ok(())
    }

    async fn get_header(&self, key: &FileKey) -> BackendResult<Option<BlockFile>> {
        self.read_header_at(&self.file_dir(key).join(HEADER_FILE)).await
    }

    async fn list_headers(&self, block_id: &BlockId) -> BackendResult<Vec<BlockFile>> {
        let block_dir = self.block_dir(block_id);
        let mut entries = match fs::read_dir(&block_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(file) = self.read_header_at(&entry.path().join(HEADER_FILE)).await? {
                files.push(file);
            }
        }
        Ok(files)
    }

    async fn delete_header(&self, key: &FileKey) -> BackendResult<bool> {
        let dir = self.file_dir(key);
        let existed = match fs::remove_file(dir.join(HEADER_FILE)).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        Self::prune_dir(&dir).await;
        Self::prune_dir(&self.block_dir(&key.block_id)).await;
        Ok(existed)
    }

    async fn upsert_part(&self, key: &PartKey, data: &[u8]) -> BackendResult<()> {
        let dir = self.file_dir(&key.file);
        fs::create_dir_all(&dir).await?;
        let frame = encode_part(&key.to_string(), data)?;
        write_atomic(&self.part_path(key), &frame).await?;
        Ok(())
    }

    async fn get_part(&self, key: &PartKey) -> BackendResult<Option<Vec<u8>>> {
        match fs::read(self.part_path(key)).await {
            Ok(frame) => decode_part(&key.to_string(), frame).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_parts(&self, key: &FileKey) -> BackendResult<usize> {
        let dir = self.file_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PART_PREFIX) {
                fs::remove_file(entry.path()).await?;
                if name.ends_with(PART_SUFFIX) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_block(&self, block_id: &BlockId) -> BackendResult<usize> {
        let headers = self.list_headers(block_id).await?.len();
        match fs::remove_dir_all(self.block_dir(block_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(headers)
    }

    async fn list_block_ids(&self) -> BackendResult<Vec<BlockId>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name();
            let Some(raw) = decode_component(&path, &name.to_string_lossy()) else {
                continue;
            };
            let Ok(block_id) = BlockId::new(raw) else {
                continue;
            };
            if !self.list_headers(&block_id).await?.is_empty() {
                ids.push(block_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockfile_types::{FileOpts, MetaValue};

    fn key(block: &str, name: &str) -> FileKey {
        FileKey::new(BlockId::new(block).unwrap(), name).unwrap()
    }

    async fn temp_backend() -> (tempfile::TempDir, FsBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path().join("rows")).await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn header_roundtrip_with_awkward_names() {
        let (_dir, backend) = temp_backend().await;
        let mut file = BlockFile::new(key("blk/../x", "logs/term 1"), FileOpts::circular(4096));
        file.meta.insert("rows".into(), MetaValue::Int(24));
        backend.upsert_header(&file).await.unwrap();

        let read = backend.get_header(&file.key()).await.unwrap().unwrap();
        assert_eq!(read, file);
        let listed = backend.list_headers(&file.block_id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn missing_rows_are_none() {
        let (_dir, backend) = temp_backend().await;
        let k = key("b", "f");
        assert!(backend.get_header(&k).await.unwrap().is_none());
        assert!(backend.get_part(&k.part(0)).await.unwrap().is_none());
        assert!(backend.list_headers(&k.block_id).await.unwrap().is_empty());
        assert_eq!(backend.delete_parts(&k).await.unwrap(), 0);
        assert!(!backend.delete_header(&k).await.unwrap());
    }

    #[tokio::test]
    async fn part_roundtrip_and_overwrite() {
        let (_dir, backend) = temp_backend().await;
        let k = key("b", "f").part(3);
        backend.upsert_part(&k, b"first").await.unwrap();
        backend.upsert_part(&k, b"second").await.unwrap();
        assert_eq!(backend.get_part(&k).await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn corrupted_part_is_detected() {
        let (_dir, backend) = temp_backend().await;
        let k = key("b", "f").part(0);
        backend.upsert_part(&k, b"payload").await.unwrap();

        let path = backend.part_path(&k);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = backend.get_part(&k).await.unwrap_err();
        assert!(matches!(err, BackendError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn truncated_part_is_detected() {
        let (_dir, backend) = temp_backend().await;
        let k = key("b", "f").part(0);
        backend.upsert_part(&k, b"payload").await.unwrap();
        let path = backend.part_path(&k);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        assert!(backend.get_part(&k).await.is_err());
    }

    #[tokio::test]
    async fn delete_file_rows_prunes_directories() {
        let (_dir, backend) = temp_backend().await;
        let file = BlockFile::new(key("b", "f"), FileOpts::default());
        backend.upsert_header(&file).await.unwrap();
        backend.upsert_part(&file.key().part(0), b"a").await.unwrap();
        backend.upsert_part(&file.key().part(1), b"b").await.unwrap();

        assert_eq!(backend.delete_parts(&file.key()).await.unwrap(), 2);
        assert!(backend.delete_header(&file.key()).await.unwrap());
        assert!(!backend.block_dir(&file.block_id).exists());
        assert!(backend.list_block_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_block_ids_tracks_live_headers() {
        let (_dir, backend) = temp_backend().await;
        for (block, name) in [("b1", "x"), ("b1", "y"), ("b2", "z")] {
            let file = BlockFile::new(key(block, name), FileOpts::default());
            backend.upsert_header(&file).await.unwrap();
            backend.upsert_part(&file.key().part(0), name.as_bytes()).await.unwrap();
        }
        let ids = backend.list_block_ids().await.unwrap();
        assert_eq!(ids.len(), 2);

        let b1 = BlockId::new("b1").unwrap();
        for name in ["x", "y"] {
            let k = key("b1", name);
            assert_eq!(backend.delete_parts(&k).await.unwrap(), 1);
            assert!(backend.delete_header(&k).await.unwrap());
        }
        assert!(backend.list_headers(&b1).await.unwrap().is_empty());
        assert!(!backend.block_dir(&b1).exists());
        assert_eq!(backend.list_block_ids().await.unwrap(), vec![BlockId::new("b2").unwrap()]);
    }

    #[tokio::test]
    async fn delete_block_removes_orphan_rows() {
        let (_dir, backend) = temp_backend().await;
        let live = BlockFile::new(key("b1", "x"), FileOpts::default());
        backend.upsert_header(&live).await.unwrap();
        // Parts with no header, as left by an interrupted delete.
        backend.upsert_part(&key("b1", "orphan").part(0), b"junk").await.unwrap();
        backend.upsert_header(&BlockFile::new(key("b2", "z"), FileOpts::default())).await.unwrap();

        let b1 = BlockId::new("b1").unwrap();
        assert_eq!(backend.delete_block(&b1).await.unwrap(), 1);
        assert!(!backend.block_dir(&b1).exists());
        assert_eq!(backend.list_block_ids().await.unwrap(), vec![BlockId::new("b2").unwrap()]);
        // deleting an absent block is a no-op
        assert_eq!(backend.delete_block(&b1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reopen_sees_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let file = BlockFile::new(key("b", "f"), FileOpts::default());
        {
            let backend = FsBackend::open(dir.path()).await.unwrap();
            backend.upsert_header(&file).await.unwrap();
            backend.upsert_part(&file.key().part(0), b"persisted").await.unwrap();
        }
        let backend = FsBackend::open(dir.path()).await.unwrap();
        assert_eq!(backend.get_header(&file.key()).await.unwrap(), Some(file.clone()));
        assert_eq!(
            backend.get_part(&file.key().part(0)).await.unwrap().unwrap(),
            b"persisted"
        );
    }
}
