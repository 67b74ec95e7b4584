//! # Heap Geometry
//!
//! Compile-time sizes shared by every part of the allocator.
//!
//! ```text
//! page  ┌────────────────────────────────────────────┐
//!       │ chunk 0 │ chunk 1 │ ... │ CHUNKS_PER_PAGE-1 │
//!       └────────────────────────────────────────────┘
//!         ▲ one bitmap bit per chunk, BITMAP_BYTES_PER_PAGE bytes per page
//! ```
//!
//! A chunk is one machine word. Chunk numbers index the bitmap directly;
//! page numbers index the page backing table and are derived from chunk
//! numbers by integer division.

use crate::header::AllocationHeader;

/// Allocation granularity in bytes (one machine word).
pub const CHUNK_SIZE: usize = size_of::<usize>();

/// Size of a physical page handed out by the page provider.
pub const PAGE_SIZE: usize = 4096;

/// Number of chunks covered by a single page.
pub const CHUNKS_PER_PAGE: usize = PAGE_SIZE / CHUNK_SIZE;

/// Number of bitmap bytes describing a single page.
pub const BITMAP_BYTES_PER_PAGE: usize = CHUNKS_PER_PAGE / 8;

/// Size of the metadata header written in front of every payload.
pub const HEADER_SIZE: usize = size_of::<AllocationHeader>();

/// Number of chunks occupied by the metadata header.
pub const HEADER_CHUNKS: usize = chunks_for_bytes(HEADER_SIZE);

const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(PAGE_SIZE % CHUNK_SIZE == 0);
const _: () = assert!(CHUNKS_PER_PAGE % 8 == 0, "a page must cover whole bitmap bytes");
const _: () = assert!(HEADER_SIZE % CHUNK_SIZE == 0, "the header must fill whole chunks");

/// Number of chunks needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn chunks_for_bytes(bytes: usize) -> usize {
    bytes.div_ceil(CHUNK_SIZE)
}

/// Page number containing `chunk`.
#[inline]
#[must_use]
pub const fn page_of_chunk(chunk: usize) -> usize {
    chunk / CHUNKS_PER_PAGE
}

/// Byte offset of `chunk` within its page.
#[inline]
#[must_use]
pub const fn offset_in_page(chunk: usize) -> usize {
    (chunk % CHUNKS_PER_PAGE) * CHUNK_SIZE
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_is_three_words() {
        assert_eq!(HEADER_SIZE, 3 * CHUNK_SIZE);
        assert_eq!(HEADER_CHUNKS, 3);
    }

    #[test]
    fn chunk_rounding() {
        assert_eq!(chunks_for_bytes(0), 0);
        assert_eq!(chunks_for_bytes(1), 1);
        assert_eq!(chunks_for_bytes(CHUNK_SIZE), 1);
        assert_eq!(chunks_for_bytes(CHUNK_SIZE + 1), 2);
    }

    #[test]
    fn page_split() {
        assert_eq!(page_of_chunk(0), 0);
        assert_eq!(page_of_chunk(CHUNKS_PER_PAGE - 1), 0);
        assert_eq!(page_of_chunk(CHUNKS_PER_PAGE), 1);
        assert_eq!(offset_in_page(CHUNKS_PER_PAGE + 2), 2 * CHUNK_SIZE);
    }
}
