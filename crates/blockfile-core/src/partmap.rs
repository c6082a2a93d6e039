//! Byte-range to part mapping.
//!
//! A file's bytes live in fixed-size parts. For a linear file, absolute
//! position `p` lives in part `p / part_size`. A circular file of
//! `max_size` bytes reuses parts `0..max_size / part_size`: position `p`
//! lives at ring position `p % max_size`, and a range that runs off the end
//! of the ring continues at part 0.

use std::collections::BTreeMap;

use blockfile_types::BlockFile;

/// Part index to the number of bytes of a range landing in that part.
///
/// When a circular range laps the ring, a part visited twice records the
/// count of its last visit.
pub type PartMap = BTreeMap<u64, u64>;

/// How a file's positions map onto parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartLayout {
    part_size: u64,
    ring: Option<u64>,
}

/// One contiguous piece of a range inside a single part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartSpan {
    pub index: u64,
    /// Offset of the piece inside the part.
    pub offset: u64,
    pub len: u64,
}

impl PartLayout {
    pub fn linear(part_size: u64) -> Self {
        debug_assert!(part_size > 0);
        Self {
            part_size,
            ring: None,
        }
    }

    /// `max_size` must be a positive multiple of `part_size`; see
    /// [`FileOpts::validate`](blockfile_types::FileOpts::validate).
    pub fn circular(part_size: u64, max_size: u64) -> Self {
        debug_assert!(part_size > 0 && max_size >= part_size && max_size % part_size == 0);
        Self {
            part_size,
            ring: Some(max_size),
        }
    }

    pub fn for_file(file: &BlockFile, part_size: u64) -> Self {
        if file.is_circular() {
            Self::circular(part_size, file.opts.max_size)
        } else {
            Self::linear(part_size)
        }
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn is_circular(&self) -> bool {
        self.ring.is_some()
    }

    /// Number of parts in the ring, `None` for linear files.
    pub fn num_parts(&self) -> Option<u64> {
        self.ring.map(|max| max / self.part_size)
    }

    /// Split `len` bytes starting at absolute position `offset` into
    /// per-part pieces, in write order.
    pub fn spans(&self, offset: u64, len: u64) -> PartSpans {
        let pos = match self.ring {
            Some(max) => offset % max,
            None => offset,
        };
        PartSpans {
            layout: *self,
            index: pos / self.part_size,
            offset: pos % self.part_size,
            remaining: len,
        }
    }

    pub fn compute_part_map(&self, offset: u64, len: u64) -> PartMap {
        let mut map = PartMap::new();
        for span in self.spans(offset, len) {
            map.insert(span.index, span.len);
        }
        map
    }

    fn next_index(&self, index: u64) -> u64 {
        match self.num_parts() {
            Some(n) => (index + 1) % n,
            None => index + 1,
        }
    }
}

/// Iterator returned by [`PartLayout::spans`].
#[derive(Clone, Debug)]
pub struct PartSpans {
    layout: PartLayout,
    index: u64,
    offset: u64,
    remaining: u64,
}

impl Iterator for PartSpans {
    type Item = PartSpan;

    fn next(&mut self) -> Option<PartSpan> {
        if self.remaining == 0 {
            return None;
        }
        let len = (self.layout.part_size - self.offset).min(self.remaining);
        let span = PartSpan {
            index: self.index,
            offset: self.offset,
            len,
        };
        self.remaining -= len;
        self.offset = 0;
        self.index = self.layout.next_index(self.index);
        Some(span)
    }
}

/// Part map of a `len`-byte range at `offset` of `file`.
pub fn compute_part_map(file: &BlockFile, part_size: u64, offset: u64, len: u64) -> PartMap {
    PartLayout::for_file(file, part_size).compute_part_map(offset, len)
}
