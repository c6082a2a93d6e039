use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use blockfile_store::Backend;
use blockfile_types::{meta_from_json, validate_meta, BlockFile, BlockId, FileKey, FileMeta, FileOpts};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, FileGuard, FlushReport, WriteBackCache};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::flusher::FlushTask;
use crate::part_io::{PartBuffers, PartIo};
use crate::partmap::{PartLayout, PartSpan};

/// Where a write lands.
#[derive(Clone, Copy, Debug)]
enum WritePos {
    At(u64),
    /// The end of a linear file, or the write cursor of a circular one.
    End,
}

/// Block file store: named byte files grouped by block, split into parts,
/// cached write-back in memory and persisted through a [`Backend`].
///
/// Every operation on one file runs under that file's lock, so operations
/// on the same file are linearizable while operations on different files
/// proceed concurrently.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use blockfile_core::{BlockStore, StoreConfig};
/// use blockfile_store::InMemoryBackend;
/// use blockfile_types::{BlockId, FileOpts};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let store = BlockStore::open(Arc::new(InMemoryBackend::new()), StoreConfig::default())?;
/// let block = BlockId::new("term-1")?;
/// store.make_file(&block, "out.log", b"hello", FileOpts::default()).await?;
/// store.append_data(&block, "out.log", b" world").await?;
/// assert_eq!(store.read_at(&block, "out.log", 0, 11).await?, b"hello world");
/// store.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct BlockStore {
    cache: Arc<WriteBackCache>,
    config: StoreConfig,
    flusher: Mutex<Option<FlushTask>>,
    /// File creation holds its block's gate shared; `delete_block` holds it
    /// exclusively, so no file appears in a block while it is deleted.
    block_gates: Mutex<HashMap<BlockId, Arc<AsyncRwLock<()>>>>,
}

impl BlockStore {
    /// Open a store over `backend`. Starts the background flusher when
    /// `config.flush.enabled`, which requires a tokio runtime.
    pub fn open(backend: Arc<dyn Backend>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let cache = Arc::new(WriteBackCache::new(backend, config.cache_capacity));
        let flusher = if config.flush.enabled {
            Some(FlushTask::spawn(cache.clone(), config.flush_interval())?)
        } else {
            None
        };
        info!(
            part_size = config.part_size,
            cache_capacity = config.cache_capacity,
            background_flush = config.flush.enabled,
            "block store opened"
        );
        Ok(Self {
            cache,
            config,
            flusher: Mutex::new(flusher),
            block_gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn part_size(&self) -> u64 {
        self.config.part_size
    }

    /// Create an empty file, then write `initial_data` at offset 0 if any.
    ///
    /// Files with `opts.ijson` must be created with empty or valid JSON
    /// initial data.
    pub async fn make_file(
        &self,
        block_id: &BlockId,
        name: &str,
        initial_data: &[u8],
        opts: FileOpts,
    ) -> StoreResult<BlockFile> {
        opts.validate(self.part_size())?;
        if opts.ijson && !initial_data.is_empty() {
            serde_json::from_slice::<serde_json::Value>(initial_data).map_err(|e| {
                StoreError::InvalidArgument(format!("ijson initial data is not JSON: {e}"))
            })?;
        }
        let key = file_key(block_id, name)?;
        let gate = self.block_gate(block_id);
        let _creating = gate.lock.read().await;
        self.make_locked(key, initial_data, opts).await
    }

    async fn make_locked(
        &self,
        key: FileKey,
        initial_data: &[u8],
        opts: FileOpts,
    ) -> StoreResult<BlockFile> {
        let mut guard = self.cache.lock(&key).await;
        if guard.header().await?.is_some() {
            return Err(StoreError::AlreadyExists(key));
        }

        let backend = self.cache.backend();
        // Parts left behind by an interrupted delete must not leak into the
        // new file.
        let stale = backend.delete_parts(&key).await?;
        if stale > 0 {
            warn!(file = %key, parts = stale, "removed stale parts before create");
        }
        let file = BlockFile::new(key.clone(), opts);
        backend.upsert_header(&file).await?;
        debug!(file = %key, circular = file.opts.circular, max_size = file.opts.max_size, "file created");

        if initial_data.is_empty() {
            return Ok(file);
        }
        guard.insert(CacheEntry::new(file));
        self.write_locked(&mut guard, &key, WritePos::At(0), initial_data)
            .await
    }

    /// Write `data` at `offset`.
    ///
    /// For a linear file, writing past the end extends it and the gap reads
    /// as zeros. For a circular file, `offset` is an absolute position in
    /// the write stream: it may not lie beyond the write cursor, and bytes
    /// that fall before the retained window are dropped.
    pub async fn write_at(
        &self,
        block_id: &BlockId,
        name: &str,
        offset: u64,
        data: &[u8],
    ) -> StoreResult<()> {
        let key = file_key(block_id, name)?;
        let mut guard = self.cache.lock(&key).await;
        self.write_locked(&mut guard, &key, WritePos::At(offset), data)
            .await?;
        Ok(())
    }

    /// Append `data` at the end of the file.
    pub async fn append_data(&self, block_id: &BlockId, name: &str, data: &[u8]) -> StoreResult<()> {
        let key = file_key(block_id, name)?;
        let mut guard = self.cache.lock(&key).await;
        self.write_locked(&mut guard, &key, WritePos::End, data).await?;
        Ok(())
    }

    /// Read up to `len` bytes at logical offset `offset`.
    ///
    /// The result is shorter than `len` when the range runs past the end,
    /// and empty when `offset` is at or beyond the end. For a circular file,
    /// offset 0 is the oldest retained byte.
    pub async fn read_at(
        &self,
        block_id: &BlockId,
        name: &str,
        offset: u64,
        len: u64,
    ) -> StoreResult<Vec<u8>> {
        let key = file_key(block_id, name)?;
        let guard = self.cache.lock(&key).await;
        let (_, data) = self.read_locked(&guard, &key, offset, len).await?;
        Ok(data)
    }

    /// The header and full contents of a file.
    pub async fn read_file(&self, block_id: &BlockId, name: &str) -> StoreResult<(BlockFile, Vec<u8>)> {
        let key = file_key(block_id, name)?;
        let guard = self.cache.lock(&key).await;
        self.read_locked(&guard, &key, 0, u64::MAX).await
    }

    /// The current header, or `None` if the file does not exist.
    pub async fn stat(&self, block_id: &BlockId, name: &str) -> StoreResult<Option<BlockFile>> {
        let key = file_key(block_id, name)?;
        let guard = self.cache.lock(&key).await;
        guard.header().await
    }

    /// Update file metadata.
    ///
    /// With `merge`, null values delete their key and others are set. Without
    /// it, the metadata is replaced by the non-null entries of `meta`.
    /// Non-finite floats are rejected.
    pub async fn write_meta(
        &self,
        block_id: &BlockId,
        name: &str,
        meta: FileMeta,
        merge: bool,
    ) -> StoreResult<()> {
        let key = file_key(block_id, name)?;
        validate_meta(&meta)?;
        let mut guard = self.cache.lock(&key).await;
        let entry = guard.load().await?;
        entry.file.apply_meta_merge(meta, merge);
        entry.header_dirty = true;
        debug!(file = %key, keys = entry.file.meta.len(), merge, "metadata updated");
        Ok(())
    }

    /// [`write_meta`](Self::write_meta) from a JSON object. Nested arrays and
    /// objects are rejected.
    pub async fn write_meta_json(
        &self,
        block_id: &BlockId,
        name: &str,
        meta: serde_json::Value,
        merge: bool,
    ) -> StoreResult<()> {
        let meta = meta_from_json(meta)?;
        self.write_meta(block_id, name, meta, merge).await
    }

    /// Delete a file's header, parts, and cached state.
    pub async fn delete_file(&self, block_id: &BlockId, name: &str) -> StoreResult<()> {
        let key = file_key(block_id, name)?;
        let mut guard = self.cache.lock(&key).await;
        if guard.header().await?.is_none() {
            return Err(StoreError::NotFound(key));
        }
        self.delete_locked(&mut guard, &key).await
    }

    /// Delete every file of a block.
    ///
    /// Files are deleted one at a time under their own locks. If any fail,
    /// the rest are still attempted and a [`StoreError::BlockDelete`] is
    /// returned; deleting the block again finishes the job. Once every file
    /// is gone, rows left under the block by interrupted deletes are swept.
    /// Files cannot be created in the block until this returns.
    pub async fn delete_block(&self, block_id: &BlockId) -> StoreResult<()> {
        let gate = self.block_gate(block_id);
        let _deleting = gate.lock.write().await;
        self.delete_block_gated(block_id).await
    }

    async fn delete_block_gated(&self, block_id: &BlockId) -> StoreResult<()> {
        let files = self.list_files(block_id).await?;
        let total = files.len();
        let mut failed = 0;
        let mut first_err = None;
        for file in files {
            let key = file.key();
            let mut guard = self.cache.lock(&key).await;
            let result = match guard.header().await {
                Ok(Some(_)) => self.delete_locked(&mut guard, &key).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(file = %key, error = %e, "failed to delete file of block");
                failed += 1;
                first_err.get_or_insert(e);
            }
        }
        if let Some(source) = first_err {
            return Err(StoreError::BlockDelete {
                block_id: block_id.clone(),
                failed,
                total,
                source: Box::new(source),
            });
        }
        let swept = self.cache.backend().delete_block(block_id).await?;
        if swept > 0 {
            warn!(block = %block_id, headers = swept, "swept headers left after file deletes");
        }
        debug!(block = %block_id, files = total, "block deleted");
        Ok(())
    }

    fn block_gate(&self, block_id: &BlockId) -> BlockGate<'_> {
        let lock = {
            let mut gates = self.block_gates.lock().expect("lock poisoned");
            gates.entry(block_id.clone()).or_default().clone()
        };
        BlockGate {
            store: self,
            block_id: block_id.clone(),
            lock,
        }
    }

    /// Headers of every file in a block, with cached changes applied.
    pub async fn list_files(&self, block_id: &BlockId) -> StoreResult<Vec<BlockFile>> {
        let stored = self.cache.backend().list_headers(block_id).await?;
        let mut files = Vec::with_capacity(stored.len());
        for header in stored {
            let guard = self.cache.lock(&header.key()).await;
            match guard.entry() {
                Some(entry) => files.push(entry.file.clone()),
                None => files.push(header),
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Ids of every block with at least one stored file.
    pub async fn list_block_ids(&self) -> StoreResult<Vec<BlockId>> {
        Ok(self.cache.backend().list_block_ids().await?)
    }

    /// Persist every dirty cache entry now, then trim clean entries beyond
    /// the cache capacity. Failed entries stay dirty.
    pub async fn flush_all(&self) -> FlushReport {
        let report = self.cache.flush_all().await;
        self.cache.evict_clean();
        report
    }

    /// Number of files currently cached.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Number of cached files with unflushed changes.
    pub async fn dirty_count(&self) -> usize {
        self.cache.dirty_len().await
    }

    /// Drop cached files; see [`StoreError::DirtyCache`] for the non-forced
    /// case. Returns the number dropped.
    pub async fn clear_cache(&self, force: bool) -> StoreResult<usize> {
        let dropped = self.cache.clear(force).await?;
        debug!(dropped, force, "cache cleared");
        Ok(dropped)
    }

    /// Stop the background flusher and flush everything.
    pub async fn shutdown(&self) -> StoreResult<FlushReport> {
        let task = self.flusher.lock().expect("lock poisoned").take();
        if let Some(task) = task {
            task.stop().await;
        }
        let report = self.cache.flush_all().await;
        info!(
            entries = report.entries,
            failures = report.failures.len(),
            "block store shut down"
        );
        report.into_result()
    }

    async fn write_locked(
        &self,
        guard: &mut FileGuard<'_>,
        key: &FileKey,
        pos: WritePos,
        data: &[u8],
    ) -> StoreResult<BlockFile> {
        let part_size = self.part_size();
        let backend = self.cache.backend();
        let entry = guard.load().await?;
        let offset = match pos {
            WritePos::At(offset) => offset,
            WritePos::End => entry.file.write_cursor,
        };
        if data.is_empty() {
            return Ok(entry.file.clone());
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| StoreError::InvalidArgument(format!("write at {offset} overflows")))?;

        let (start, data) = if entry.file.is_circular() {
            let cursor = entry.file.write_cursor;
            if offset > cursor {
                return Err(StoreError::InvalidArgument(format!(
                    "write at {offset} is past the write cursor {cursor} of a circular file"
                )));
            }
            // Oldest position the ring still holds once this write lands.
            let floor = cursor.max(end).saturating_sub(entry.file.opts.max_size);
            if end <= floor {
                debug!(file = %key, offset, floor, "write falls before the ring window; dropped");
                return Ok(entry.file.clone());
            }
            let start = offset.max(floor);
            (start, &data[(start - offset) as usize..])
        } else {
            (offset, data)
        };

        let layout = PartLayout::for_file(&entry.file, part_size);
        let spans: Vec<PartSpan> = layout.spans(start, data.len() as u64).collect();
        let indices: Vec<u64> = spans.iter().map(|s| s.index).collect();
        let io = PartIo::new(backend, key, &layout);
        io.ensure_loaded(&mut entry.parts, &indices).await?;

        let mut consumed = 0usize;
        for span in &spans {
            let n = span.len as usize;
            io.write_span(&mut entry.parts, *span, &data[consumed..consumed + n]);
            consumed += n;
        }
        entry.file.apply_write(start, data.len() as u64);
        entry.header_dirty = true;
        debug!(file = %key, offset = start, len = data.len(), size = entry.file.size, "write");
        Ok(entry.file.clone())
    }

    async fn read_locked(
        &self,
        guard: &FileGuard<'_>,
        key: &FileKey,
        offset: u64,
        len: u64,
    ) -> StoreResult<(BlockFile, Vec<u8>)> {
        let file = guard
            .header()
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if offset >= file.size || len == 0 {
            return Ok((file, Vec::new()));
        }
        let len = len.min(file.size - offset);
        let layout = PartLayout::for_file(&file, self.part_size());
        let io = PartIo::new(self.cache.backend(), key, &layout);
        let no_parts = PartBuffers::new();
        let cached = guard.entry().map_or(&no_parts, |e| &e.parts);

        let mut out = Vec::with_capacity(len as usize);
        for span in layout.spans(file.logical_start() + offset, len) {
            io.read_span(cached, span, &mut out).await?;
        }
        Ok((file, out))
    }

    /// Delete stored rows, then the cache entry. A failed delete keeps the
    /// entry so acknowledged writes survive it.
    async fn delete_locked(&self, guard: &mut FileGuard<'_>, key: &FileKey) -> StoreResult<()> {
        let backend = self.cache.backend();
        // Parts first: a failure leaves the header, so a retry finds the file.
        let parts = backend.delete_parts(key).await?;
        if let Err(e) = backend.delete_header(key).await {
            // The stored parts are gone; cached ones must be written back.
            if let Some(entry) = guard.entry_mut() {
                for part in entry.parts.values_mut() {
                    part.dirty = true;
                }
            }
            return Err(e.into());
        }
        if let Some(entry) = guard.remove() {
            if entry.is_dirty() {
                debug!(file = %key, "discarding unflushed changes of deleted file");
            }
        }
        debug!(file = %key, parts, "file deleted");
        Ok(())
    }
}

/// A block's gate, dropped from the table when its last user goes away.
struct BlockGate<'a> {
    store: &'a BlockStore,
    block_id: BlockId,
    lock: Arc<AsyncRwLock<()>>,
}

impl Drop for BlockGate<'_> {
    fn drop(&mut self) {
        let Ok(mut gates) = self.store.block_gates.lock() else {
            return;
        };
        // The table and `self` are the only holders.
        let idle = gates.get(&self.block_id).is_some_and(|current| {
            Arc::ptr_eq(current, &self.lock) && Arc::strong_count(&self.lock) == 2
        });
        if idle {
            gates.remove(&self.block_id);
        }
    }
}

impl Drop for BlockStore {
    fn drop(&mut self) {
        // Dropping the task signals it to stop.
        if let Ok(mut flusher) = self.flusher.lock() {
            flusher.take();
        }
    }
}

fn file_key(block_id: &BlockId, name: &str) -> StoreResult<FileKey> {
    Ok(FileKey::new(block_id.clone(), name)?)
}
