use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use blockfile_types::{BlockFile, BlockId, FileKey, PartKey};

use crate::error::BackendResult;
use crate::traits::Backend;

/// In-memory, map-based backend.
///
/// Intended for tests and embedding. Rows live in ordered maps behind
/// `RwLock`s and are cloned on read/write. Data is lost when dropped.
pub struct InMemoryBackend {
    headers: RwLock<BTreeMap<FileKey, BlockFile>>,
    parts: RwLock<BTreeMap<PartKey, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            headers: RwLock::new(BTreeMap::new()),
            parts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of header rows.
    pub fn header_count(&self) -> usize {
        self.headers.read().expect("lock poisoned").len()
    }

    /// Number of part rows across all files.
    pub fn part_count(&self) -> usize {
        self.parts.read().expect("lock poisoned").len()
    }

    /// Indices of the stored parts of one file, ascending.
    pub fn part_indices(&self, key: &FileKey) -> Vec<u64> {
        let parts = self.parts.read().expect("lock poisoned");
        parts
            .range(key.part(0)..=key.part(u64::MAX))
            .map(|(k, _)| k.index)
            .collect()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn upsert_header(&self, file: &BlockFile) -> BackendResult<()> {
        let mut headers = self.headers.write().expect("lock poisoned");
        headers.insert(file.key(), file.clone());
        Ok(())
    }

    async fn get_header(&self, key: &FileKey) -> BackendResult<Option<BlockFile>> {
        let headers = self.headers.read().expect("lock poisoned");
        Ok(headers.get(key).cloned())
    }

    async fn list_headers(&self, block_id: &BlockId) -> BackendResult<Vec<BlockFile>> {
        let headers = self.headers.read().expect("lock poisoned");
        Ok(headers
            .values()
            .filter(|f| &f.block_id == block_id)
            .cloned()
            .collect())
    }

    async fn delete_header(&self, key: &FileKey) -> BackendResult<bool> {
        let mut headers = self.headers.write().expect("lock poisoned");
        Ok(headers.remove(key).is_some())
    }

    async fn upsert_part(&self, key: &PartKey, data: &[u8]) -> BackendResult<()> {
        let mut parts = self.parts.write().expect("lock poisoned");
        parts.insert(key.clone(), data.to_vec());
        Ok(())
    }

    async fn get_part(&self, key: &PartKey) -> BackendResult<Option<Vec<u8>>> {
        let parts = self.parts.read().expect("lock poisoned");
        Ok(parts.get(key).cloned())
    }

    async fn delete_parts(&self, key: &FileKey) -> BackendResult<usize> {
        let mut parts = self.parts.write().expect("lock poisoned");
        let doomed: Vec<PartKey> = parts
            .range(key.part(0)..=key.part(u64::MAX))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            parts.remove(k);
        }
        Ok(doomed.len())
    }

    async fn delete_block(&self, block_id: &BlockId) -> BackendResult<usize> {
        let removed = {
            let mut headers = self.headers.write().expect("lock poisoned");
            let before = headers.len();
            headers.retain(|k, _| &k.block_id != block_id);
            before - headers.len()
        };
        let mut parts = self.parts.write().expect("lock poisoned");
        parts.retain(|k, _| &k.file.block_id != block_id);
        Ok(removed)
    }

    async fn list_block_ids(&self) -> BackendResult<Vec<BlockId>> {
        let headers = self.headers.read().expect("lock poisoned");
        let ids: BTreeSet<BlockId> = headers.keys().map(|k| k.block_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("header_count", &self.header_count())
            .field("part_count", &self.part_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockfile_types::FileOpts;

    fn key(block: &str, name: &str) -> FileKey {
        FileKey::new(BlockId::new(block).unwrap(), name).unwrap()
    }

    fn header(block: &str, name: &str) -> BlockFile {
        BlockFile::new(key(block, name), FileOpts::default())
    }

    #[tokio::test]
    async fn header_crud() {
        let backend = InMemoryBackend::new();
        let file = header("b1", "f");
        backend.upsert_header(&file).await.unwrap();
        assert_eq!(backend.get_header(&file.key()).await.unwrap(), Some(file.clone()));
        assert!(backend.delete_header(&file.key()).await.unwrap());
        assert!(!backend.delete_header(&file.key()).await.unwrap());
        assert!(backend.get_header(&file.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parts_are_scoped_to_their_file() {
        let backend = InMemoryBackend::new();
        let a = key("b1", "a");
        let ab = key("b1", "ab");
        backend.upsert_part(&a.part(0), b"a0").await.unwrap();
        backend.upsert_part(&a.part(7), b"a7").await.unwrap();
        backend.upsert_part(&ab.part(0), b"ab0").await.unwrap();

        assert_eq!(backend.part_indices(&a), vec![0, 7]);
        assert_eq!(backend.delete_parts(&a).await.unwrap(), 2);
        assert!(backend.get_part(&a.part(0)).await.unwrap().is_none());
        assert_eq!(
            backend.get_part(&ab.part(0)).await.unwrap().as_deref(),
            Some(&b"ab0"[..])
        );
    }

    #[tokio::test]
    async fn block_ids_follow_headers() {
        let backend = InMemoryBackend::new();
        backend.upsert_header(&header("b1", "x")).await.unwrap();
        backend.upsert_header(&header("b1", "y")).await.unwrap();
        backend.upsert_header(&header("b2", "x")).await.unwrap();
        assert_eq!(backend.list_block_ids().await.unwrap().len(), 2);

        backend.delete_header(&key("b1", "x")).await.unwrap();
        backend.delete_header(&key("b1", "y")).await.unwrap();
        assert_eq!(backend.header_count(), 1);
        let ids = backend.list_block_ids().await.unwrap();
        assert_eq!(ids, vec![BlockId::new("b2").unwrap()]);
    }

    #[tokio::test]
    async fn delete_block_sweeps_headers_and_parts() {
        let backend = InMemoryBackend::new();
        backend.upsert_header(&header("b1", "x")).await.unwrap();
        backend.upsert_header(&header("b2", "x")).await.unwrap();
        backend.upsert_part(&key("b1", "x").part(0), b"data").await.unwrap();
        backend.upsert_part(&key("b1", "orphan").part(3), b"junk").await.unwrap();

        assert_eq!(backend.delete_block(&BlockId::new("b1").unwrap()).await.unwrap(), 1);
        assert_eq!(backend.header_count(), 1);
        assert_eq!(backend.part_count(), 0);
    }

    #[tokio::test]
    async fn upsert_parts_writes_all() {
        let backend = InMemoryBackend::new();
        let f = key("b", "f");
        let batch = vec![(f.part(0), vec![1u8; 4]), (f.part(1), vec![2u8; 2])];
        backend.upsert_parts(&batch).await.unwrap();
        assert_eq!(backend.part_count(), 2);
    }

    #[test]
    fn debug_format() {
        let backend = InMemoryBackend::new();
        let debug = format!("{backend:?}");
        assert!(debug.contains("InMemoryBackend"));
        assert!(debug.contains("part_count"));
    }
}
