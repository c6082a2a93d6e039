use async_trait::async_trait;
use blockfile_types::{BlockFile, BlockId, FileKey, PartKey};

use crate::error::BackendResult;

/// Durable storage for file headers and parts.
///
/// All implementations must satisfy these invariants:
/// - Each call is atomic for the single row it touches.
/// - Rows for different files may be read and written concurrently.
/// - The backend never interprets part contents.
/// - All I/O errors are propagated, never silently ignored.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert or replace a file header.
    async fn upsert_header(&self, file: &BlockFile) -> BackendResult<()>;

    /// Read a file header. Returns `Ok(None)` if the file does not exist.
    async fn get_header(&self, key: &FileKey) -> BackendResult<Option<BlockFile>>;

    /// All headers stored under a block, in no particular order.
    async fn list_headers(&self, block_id: &BlockId) -> BackendResult<Vec<BlockFile>>;

    /// Delete a file header. Returns `true` if it existed.
    async fn delete_header(&self, key: &FileKey) -> BackendResult<bool>;

    /// Insert or replace the full contents of one part.
    async fn upsert_part(&self, key: &PartKey, data: &[u8]) -> BackendResult<()>;

    /// Read one part. Returns `Ok(None)` if it was never written.
    async fn get_part(&self, key: &PartKey) -> BackendResult<Option<Vec<u8>>>;

    /// Delete every part of a file. Returns the number of parts removed.
    async fn delete_parts(&self, key: &FileKey) -> BackendResult<usize>;

    /// Delete every header and part under a block. Returns the number of
    /// headers removed.
    async fn delete_block(&self, block_id: &BlockId) -> BackendResult<usize>;

    /// Every block id that has at least one header.
    async fn list_block_ids(&self) -> BackendResult<Vec<BlockId>>;

    /// Write several parts.
    ///
    /// Default implementation calls `upsert_part()` for each entry and stops
    /// at the first failure. Parts written before the failure stay written.
    async fn upsert_parts(&self, parts: &[(PartKey, Vec<u8>)]) -> BackendResult<()> {
        for (key, data) in parts {
            self.upsert_part(key, data).await?;
        }
        Ok(())
    }
}
