//! Write-back cache of file headers and parts.
//!
//! Each file key owns a slot: an async mutex around an optional cache entry.
//! Holding the slot's lock (a [`FileGuard`]) serializes every operation on
//! that file, whether or not the file is currently cached. Operations on
//! different files never wait on each other except for the short critical
//! section on the slot table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use blockfile_store::Backend;
use blockfile_types::{BlockFile, FileKey, PartKey};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::part_io::PartBuffers;

/// Cached state of one file.
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
    pub file: BlockFile,
    pub header_dirty: bool,
    pub parts: PartBuffers,
    pub last_access: Instant,
}

impl CacheEntry {
    pub fn new(file: BlockFile) -> Self {
        Self {
            file,
            header_dirty: false,
            parts: PartBuffers::new(),
            last_access: Instant::now(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.header_dirty || self.parts.values().any(|p| p.dirty)
    }
}

type Slot = Arc<AsyncMutex<Option<CacheEntry>>>;

/// Outcome of a flush pass.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Entries that had something to write and wrote it.
    pub entries: usize,
    pub parts: usize,
    pub headers: usize,
    /// Entries whose flush failed. They stay dirty and are retried.
    pub failures: Vec<(FileKey, StoreError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn the first failure into an error.
    pub fn into_result(mut self) -> StoreResult<Self> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        let (_, err) = self.failures.swap_remove(0);
        Err(err)
    }
}

#[derive(Debug, Default)]
struct EntryFlush {
    parts: usize,
    header: bool,
}

pub(crate) struct WriteBackCache {
    backend: Arc<dyn Backend>,
    capacity: usize,
    slots: Mutex<HashMap<FileKey, Slot>>,
    cached: AtomicUsize,
}

/// Exclusive access to one file's slot.
///
/// The slot is dropped from the table when the last guard for a vacant
/// slot goes away.
pub(crate) struct FileGuard<'a> {
    cache: &'a WriteBackCache,
    key: FileKey,
    slot: Slot,
    guard: Option<OwnedMutexGuard<Option<CacheEntry>>>,
}

impl WriteBackCache {
    pub fn new(backend: Arc<dyn Backend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity,
            slots: Mutex::new(HashMap::new()),
            cached: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.cached.load(Ordering::Acquire)
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &FileKey) -> FileGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().expect("lock poisoned");
            slots.entry(key.clone()).or_default().clone()
        };
        self.lock_slot(key.clone(), slot).await
    }

    async fn lock_slot(&self, key: FileKey, slot: Slot) -> FileGuard<'_> {
        let guard = slot.clone().lock_owned().await;
        FileGuard {
            cache: self,
            key,
            slot,
            guard: Some(guard),
        }
    }

    fn snapshot(&self) -> Vec<(FileKey, Slot)> {
        let slots = self.slots.lock().expect("lock poisoned");
        slots.iter().map(|(k, s)| (k.clone(), s.clone())).collect()
    }

    fn release_slot(&self, key: &FileKey, slot: &Slot) {
        let mut slots = self.slots.lock().expect("lock poisoned");
        let vacant = match slots.get(key) {
            // The table and `slot` are the only holders.
            Some(current) if Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2 => {
                slot.try_lock().map(|s| s.is_none()).unwrap_or(false)
            }
            _ => false,
        };
        if vacant {
            slots.remove(key);
        }
    }

    /// Persist every dirty entry. Entries stay cached and become clean.
    pub async fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();
        for (key, slot) in self.snapshot() {
            let mut guard = self.lock_slot(key, slot).await;
            match guard.flush().await {
                Ok(EntryFlush { parts: 0, header: false }) => {}
                Ok(done) => {
                    report.entries += 1;
                    report.parts += done.parts;
                    report.headers += usize::from(done.header);
                }
                Err(err) => {
                    warn!(file = %guard.key, error = %err, "flush failed; entry stays dirty");
                    report.failures.push((guard.key.clone(), err));
                }
            }
        }
        if report.entries > 0 || !report.failures.is_empty() {
            debug!(
                entries = report.entries,
                parts = report.parts,
                headers = report.headers,
                failures = report.failures.len(),
                "flush pass complete"
            );
        }
        report
    }

    /// Evict clean, unlocked entries, least recently used first, until at
    /// most `capacity` remain. Returns the number evicted.
    pub fn evict_clean(&self) -> usize {
        let cached = self.len();
        if cached <= self.capacity {
            return 0;
        }
        let mut slots = self.slots.lock().expect("lock poisoned");
        let mut candidates: Vec<(Instant, FileKey)> = slots
            .iter()
            .filter_map(|(key, slot)| {
                let state = slot.try_lock().ok()?;
                let entry = state.as_ref()?;
                if entry.is_dirty() {
                    return None;
                }
                Some((entry.last_access, key.clone()))
            })
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, key) in candidates.into_iter().take(cached - self.capacity) {
            let remove = match slots.get(&key) {
                Some(slot) => {
                    if let Ok(mut state) = slot.try_lock() {
                        if state.as_ref().is_some_and(|e| !e.is_dirty()) {
                            *state = None;
                            self.cached.fetch_sub(1, Ordering::AcqRel);
                            evicted += 1;
                        }
                    }
                    Arc::strong_count(slot) == 1
                }
                None => false,
            };
            if remove {
                slots.remove(&key);
            }
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.len(), "evicted clean cache entries");
        }
        evicted
    }

    /// Number of cached entries holding unflushed changes.
    pub async fn dirty_len(&self) -> usize {
        let mut dirty = 0;
        for (key, slot) in self.snapshot() {
            let guard = self.lock_slot(key, slot).await;
            if guard.entry().is_some_and(CacheEntry::is_dirty) {
                dirty += 1;
            }
        }
        dirty
    }

    /// Drop cached entries.
    ///
    /// Without `force`, dirty entries are kept and reported as
    /// [`StoreError::DirtyCache`] after the clean ones are dropped. With
    /// `force`, unflushed changes are discarded.
    pub async fn clear(&self, force: bool) -> StoreResult<usize> {
        let mut dropped = 0;
        let mut dirty = 0;
        for (key, slot) in self.snapshot() {
            let mut guard = self.lock_slot(key, slot).await;
            let is_dirty = match guard.entry() {
                Some(entry) => entry.is_dirty(),
                None => continue,
            };
            if is_dirty && !force {
                dirty += 1;
                continue;
            }
            if is_dirty {
                warn!(file = %guard.key, "discarding unflushed changes");
            }
            guard.remove();
            dropped += 1;
        }
        if dirty > 0 {
            return Err(StoreError::DirtyCache { dirty });
        }
        Ok(dropped)
    }
}

impl FileGuard<'_> {
    pub fn entry(&self) -> Option<&CacheEntry> {
        self.guard.as_ref().and_then(|g| g.as_ref())
    }

    /// Current header: the cached one, or the stored one without caching it.
    pub async fn header(&self) -> StoreResult<Option<BlockFile>> {
        if let Some(entry) = self.entry() {
            return Ok(Some(entry.file.clone()));
        }
        Ok(self.cache.backend.get_header(&self.key).await?)
    }

    pub fn entry_mut(&mut self) -> Option<&mut CacheEntry> {
        self.guard.as_mut().and_then(|g| g.as_mut())
    }

    /// The cached entry, loading the stored header first if needed.
    pub async fn load(&mut self) -> StoreResult<&mut CacheEntry> {
        if self.entry().is_none() {
            let file = self
                .cache
                .backend
                .get_header(&self.key)
                .await?
                .ok_or_else(|| StoreError::NotFound(self.key.clone()))?;
            self.insert(CacheEntry::new(file));
        }
        match self.guard.as_mut().and_then(|g| g.as_mut()) {
            Some(entry) => {
                entry.last_access = Instant::now();
                Ok(entry)
            }
            None => Err(StoreError::NotFound(self.key.clone())),
        }
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        if let Some(state) = self.guard.as_mut() {
            if state.replace(entry).is_none() {
                self.cache.cached.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    pub fn remove(&mut self) -> Option<CacheEntry> {
        let removed = self.guard.as_mut().and_then(|state| state.take());
        if removed.is_some() {
            self.cache.cached.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Write dirty parts, then the header if dirty. Parts go first so a
    /// stored header never describes bytes that were not stored.
    ///
    /// Once stored, part buffers are released; later reads and writes load
    /// them back from the backend.
    async fn flush(&mut self) -> StoreResult<EntryFlush> {
        let cache = self.cache;
        let backend = cache.backend.as_ref();
        let Some(entry) = self.guard.as_mut().and_then(|g| g.as_mut()) else {
            return Ok(EntryFlush::default());
        };
        let key = entry.file.key();
        let batch: Vec<(PartKey, Vec<u8>)> = entry
            .parts
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(i, p)| (key.part(*i), p.data.clone()))
            .collect();
        if !batch.is_empty() {
            backend.upsert_parts(&batch).await?;
        }
        entry.parts.clear();
        let header = entry.header_dirty;
        if header {
            backend.upsert_header(&entry.file).await?;
            entry.header_dirty = false;
        }
        Ok(EntryFlush {
            parts: batch.len(),
            header,
        })
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        let vacant = self.guard.as_ref().is_some_and(|g| g.is_none());
        drop(self.guard.take());
        if vacant {
            self.cache.release_slot(&self.key, &self.slot);
        }
    }
}
