//! # Chunk Bitmap
//!
//! One bit per chunk of the heap: `1` if the chunk belongs to a live
//! allocation (header chunks included), `0` if it is free. Bit `n % 8` of byte
//! `n / 8` describes chunk `n`.
//!
//! The bitmap is sized once from the chunk universe and lives in memory
//! obtained from the [`BootstrapAllocator`](crate::BootstrapAllocator); it is
//! never resized.
//!
//! ## First-fit search
//!
//! [`ChunkBitmap::find_run`] walks candidate start positions from chunk 0
//! upwards. A candidate fails at the first occupied chunk inside its window;
//! the next candidate is the chunk after it, or the first chunk after its
//! bitmap byte if that byte is completely occupied. Both jumps only skip
//! starts whose window would contain an occupied chunk, so the result equals
//! that of a bit-by-bit scan.

use crate::geometry::BITMAP_BYTES_PER_PAGE;
use core::ops::Range;

/// Occupancy bitmap over the chunk universe.
pub struct ChunkBitmap<'m> {
    bytes: &'m mut [u8],
    chunk_count: usize,
}

impl<'m> ChunkBitmap<'m> {
    /// Number of bitmap bytes needed for `chunk_count` chunks.
    #[must_use]
    pub const fn bytes_for(chunk_count: usize) -> usize {
        chunk_count.div_ceil(8)
    }

    /// Wraps zeroed (or otherwise consistent) storage for `chunk_count` chunks.
    pub(crate) fn new(bytes: &'m mut [u8], chunk_count: usize) -> Self {
        debug_assert!(bytes.len() >= Self::bytes_for(chunk_count));
        Self { bytes, chunk_count }
    }

    /// Number of chunks in the universe.
    #[inline]
    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Raw bitmap bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }

    #[inline]
    #[must_use]
    pub fn is_set(&self, chunk: usize) -> bool {
        self.bytes[chunk / 8] & (1 << (chunk % 8)) != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, chunk: usize) {
        self.bytes[chunk / 8] |= 1 << (chunk % 8);
    }

    #[inline]
    pub(crate) fn clear(&mut self, chunk: usize) {
        self.bytes[chunk / 8] &= !(1 << (chunk % 8));
    }

    pub(crate) fn set_range(&mut self, chunks: Range<usize>) {
        for chunk in chunks {
            self.set(chunk);
        }
    }

    pub(crate) fn clear_range(&mut self, chunks: Range<usize>) {
        for chunk in chunks {
            self.clear(chunk);
        }
    }

    /// First occupied chunk in `chunks`, if any.
    #[must_use]
    pub fn first_set(&self, mut chunks: Range<usize>) -> Option<usize> {
        chunks.find(|&chunk| self.is_set(chunk))
    }

    /// First free chunk in `chunks`, if any.
    #[must_use]
    pub fn first_clear(&self, mut chunks: Range<usize>) -> Option<usize> {
        chunks.find(|&chunk| !self.is_set(chunk))
    }

    /// Whether every chunk belonging to `page` is free.
    #[must_use]
    pub fn is_page_clear(&self, page: usize) -> bool {
        let start = page.saturating_mul(BITMAP_BYTES_PER_PAGE).min(self.bytes.len());
        let end = start.saturating_add(BITMAP_BYTES_PER_PAGE).min(self.bytes.len());
        self.bytes[start..end].iter().all(|&byte| byte == 0)
    }

    /// Number of occupied chunks.
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.bytes.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// First start chunk of a free run of `needed` chunks.
    ///
    /// Runs may end at the very last chunk of the universe. Returns `None` if
    /// `needed` is zero or no run exists.
    #[must_use]
    pub fn find_run(&self, needed: usize) -> Option<usize> {
        self.find_run_from(needed, 0)
    }

    /// As [`find_run`](Self::find_run), considering only starts at or after
    /// `from`.
    #[must_use]
    pub fn find_run_from(&self, needed: usize, from: usize) -> Option<usize> {
        if needed == 0 || needed > self.chunk_count {
            return None;
        }

        let last_start = self.chunk_count - needed;
        let mut start = from;
        while start <= last_start {
            let Some(occupied) = self.first_set(start..start + needed) else {
                return Some(start);
            };

            start = if self.bytes[occupied / 8] == 0xFF {
                (occupied / 8 + 1) * 8
            } else {
                occupied + 1
            };
        }
        None
    }
}
