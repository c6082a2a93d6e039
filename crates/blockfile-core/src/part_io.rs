use std::collections::BTreeMap;

use blockfile_store::Backend;
use blockfile_types::FileKey;

use crate::error::StoreResult;
use crate::partmap::{PartLayout, PartSpan};

/// A cached part and whether it differs from the stored row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartBuffer {
    pub data: Vec<u8>,
    pub dirty: bool,
}

/// Cached parts of one file, by index.
pub type PartBuffers = BTreeMap<u64, PartBuffer>;

/// Reads and writes part spans of one file, preferring cached buffers over
/// the backend.
///
/// Short or missing parts read as zeros. Parts of a circular file are padded
/// to the full part size on first write so every ring slot has a fixed
/// length.
pub(crate) struct PartIo<'a> {
    backend: &'a dyn Backend,
    key: &'a FileKey,
    part_size: u64,
    fixed_slots: bool,
}

impl<'a> PartIo<'a> {
    pub fn new(backend: &'a dyn Backend, key: &'a FileKey, layout: &PartLayout) -> Self {
        Self {
            backend,
            key,
            part_size: layout.part_size(),
            fixed_slots: layout.is_circular(),
        }
    }

    /// Append the bytes of `span` to `out`.
    pub async fn read_span(
        &self,
        cached: &PartBuffers,
        span: PartSpan,
        out: &mut Vec<u8>,
    ) -> StoreResult<()> {
        let start = out.len();
        match cached.get(&span.index) {
            Some(buf) => copy_clamped(&buf.data, span, out),
            None => {
                if let Some(data) = self.backend.get_part(&self.key.part(span.index)).await? {
                    copy_clamped(&data, span, out);
                }
            }
        }
        out.resize(start + span.len as usize, 0);
        Ok(())
    }

    /// Load every part in `indices` not yet cached. Nothing is modified
    /// if a backend read fails.
    pub async fn ensure_loaded(
        &self,
        parts: &mut PartBuffers,
        indices: &[u64],
    ) -> StoreResult<()> {
        let mut loaded = Vec::new();
        for &index in indices {
            if parts.contains_key(&index) || loaded.iter().any(|(i, _)| *i == index) {
                continue;
            }
            let data = self
                .backend
                .get_part(&self.key.part(index))
                .await?
                .unwrap_or_default();
            loaded.push((index, data));
        }
        for (index, data) in loaded {
            parts.insert(index, PartBuffer { data, dirty: false });
        }
        Ok(())
    }

    /// Copy `data` into the cached part of `span` and mark it dirty.
    ///
    /// The part must already be loaded with [`ensure_loaded`](Self::ensure_loaded);
    /// an unloaded part starts empty.
    pub fn write_span(&self, parts: &mut PartBuffers, span: PartSpan, data: &[u8]) {
        debug_assert_eq!(span.len as usize, data.len());
        let buf = parts.entry(span.index).or_default();
        let start = span.offset as usize;
        let end = start + data.len();
        let min_len = if self.fixed_slots {
            end.max(self.part_size as usize)
        } else {
            end
        };
        if buf.data.len() < min_len {
            buf.data.resize(min_len, 0);
        }
        buf.data[start..end].copy_from_slice(data);
        buf.dirty = true;
    }
}

fn copy_clamped(data: &[u8], span: PartSpan, out: &mut Vec<u8>) {
    let start = (span.offset as usize).min(data.len());
    let end = (span.offset + span.len).min(data.len() as u64) as usize;
    out.extend_from_slice(&data[start..end]);
}
