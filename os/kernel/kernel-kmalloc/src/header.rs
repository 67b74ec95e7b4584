//! # Allocation Header
//!
//! Every payload handed out by the allocator is preceded by a fixed-size
//! header recording where the allocation starts and how large it is:
//!
//! ```text
//! +-------------+------------+----------+----------+----------------------+
//! | start_chunk | chunk_size | checksum | reserved |  payload (chunk_size |
//! |   (word)    |   (word)   |  (byte)  | (zeros)  |   chunks)            |
//! +-------------+------------+----------+----------+----------------------+
//! ^ header address                                 ^ pointer returned
//! ```
//!
//! ## Checksum
//!
//! The checksum byte is the two's-complement negation of the byte sum of the
//! header with the checksum field still zero. Summing all header bytes,
//! checksum included, therefore yields `0 mod 256` for an intact header.
//!
//! Changing a single byte always breaks the sum. Two or more altered bytes
//! whose deltas cancel out mod 256 go unnoticed; the checksum detects stray
//! writes, it does not authenticate.

use crate::geometry::{HEADER_CHUNKS, HEADER_SIZE};
use core::ptr;

const WORD: usize = size_of::<usize>();

/// Metadata stored immediately before every payload.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AllocationHeader {
    /// Chunk index of the header itself.
    start_chunk: usize,
    /// Payload length in chunks, header excluded.
    chunk_size: usize,
    checksum: u8,
    /// Keeps the tail of the last word at a defined value.
    reserved: [u8; WORD - 1],
}

impl AllocationHeader {
    /// Builds a header for a run starting at `start_chunk` whose payload
    /// spans `chunk_size` chunks and seals it with its checksum.
    #[must_use]
    pub fn new(start_chunk: usize, chunk_size: usize) -> Self {
        let mut header = Self {
            start_chunk,
            chunk_size,
            checksum: 0,
            reserved: [0; WORD - 1],
        };
        header.checksum = calculate_checksum(&header.to_bytes());
        header
    }

    #[must_use]
    pub const fn start_chunk(&self) -> usize {
        self.start_chunk
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Chunks owned by the allocation, header included.
    #[must_use]
    pub const fn total_chunks(&self) -> Option<usize> {
        self.chunk_size.checked_add(HEADER_CHUNKS)
    }

    /// One past the last chunk owned by the allocation.
    #[must_use]
    pub const fn end_chunk(&self) -> Option<usize> {
        match self.total_chunks() {
            Some(total) => self.start_chunk.checked_add(total),
            None => None,
        }
    }

    /// Byte image of the header as it is laid out in memory.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0; HEADER_SIZE];
        bytes[..WORD].copy_from_slice(&self.start_chunk.to_ne_bytes());
        bytes[WORD..2 * WORD].copy_from_slice(&self.chunk_size.to_ne_bytes());
        bytes[2 * WORD] = self.checksum;
        bytes[2 * WORD + 1..].copy_from_slice(&self.reserved);
        bytes
    }

    /// Decodes a header image without validating it.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut start_chunk = [0; WORD];
        let mut chunk_size = [0; WORD];
        let mut reserved = [0; WORD - 1];
        start_chunk.copy_from_slice(&bytes[..WORD]);
        chunk_size.copy_from_slice(&bytes[WORD..2 * WORD]);
        reserved.copy_from_slice(&bytes[2 * WORD + 1..]);
        Self {
            start_chunk: usize::from_ne_bytes(start_chunk),
            chunk_size: usize::from_ne_bytes(chunk_size),
            checksum: bytes[2 * WORD],
            reserved,
        }
    }

    /// Stores the header image at `dst`.
    ///
    /// # Safety
    /// `dst` must be valid for writes of [`HEADER_SIZE`] bytes.
    pub unsafe fn write_to(&self, dst: *mut u8) {
        let bytes = self.to_bytes();
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, HEADER_SIZE) };
    }

    /// Loads the raw header image stored at `src`.
    ///
    /// # Safety
    /// `src` must be valid for reads of [`HEADER_SIZE`] bytes.
    #[must_use]
    pub unsafe fn read_from(src: *const u8) -> [u8; HEADER_SIZE] {
        unsafe { ptr::read_unaligned(src.cast::<[u8; HEADER_SIZE]>()) }
    }
}

/// Two's-complement negation of the byte sum of `bytes`.
///
/// Over a header whose checksum field is zero this is the checksum to store;
/// over a sealed header it is zero exactly when the byte sum is intact.
#[must_use]
pub fn calculate_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (sum ^ 0xFF).wrapping_add(1)
}
