//! # Allocator Errors
//!
//! Failures fall into three groups:
//!
//! * **Invalid arguments** ([`KmallocError::ZeroSize`]) are rejected before
//!   any state is touched.
//! * **Capacity limits** ([`KmallocError::OutOfMemory`],
//!   [`KmallocError::OutOfPages`], [`KmallocError::Discontiguous`]) leave the
//!   allocator exactly as it was; the caller decides whether they are fatal.
//! * **Corruption** ([`KmallocError::Corruption`]) poisons the allocator.
//!   Every later request fails with [`KmallocError::Poisoned`], since the
//!   bitmap can no longer be trusted.

/// Error returned by [`Kmalloc::allocate`](crate::Kmalloc::allocate) and
/// [`Kmalloc::free`](crate::Kmalloc::free).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KmallocError {
    #[error("zero-sized allocation request")]
    ZeroSize,
    #[error("no run of {chunks} free chunks is available")]
    OutOfMemory { chunks: usize },
    #[error("the page provider could not back another page")]
    OutOfPages,
    #[error("pages {first}..={last} are not backed by consecutive physical pages")]
    Discontiguous { first: usize, last: usize },
    #[error("heap corruption detected: {0}")]
    Corruption(#[from] Corruption),
    #[error("allocator is poisoned by earlier heap corruption")]
    Poisoned,
}

/// The specific integrity check a freed header failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Corruption {
    #[error("header at {header:#x} fails its checksum (residue {residue:#04x})")]
    Checksum { header: usize, residue: u8 },
    #[error(
        "header at {header:#x} claims chunks {start}..{end} outside a universe of {chunk_count} chunks"
    )]
    OutOfRange {
        header: usize,
        start: usize,
        end: usize,
        chunk_count: usize,
    },
    #[error("header at {header:#x} is not where chunk {start} lives")]
    Misplaced { header: usize, start: usize },
    #[error("chunk {chunk} is not allocated")]
    ChunkNotAllocated { chunk: usize },
}

/// Error returned while setting up an allocator.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("the page provider reports less memory than a single chunk")]
    NoMemory,
    #[error("the allocator is already initialized")]
    AlreadyInitialized,
    #[error("bootstrap allocation failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Error returned by the [`BootstrapAllocator`](crate::BootstrapAllocator).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootstrapError {
    #[error("zero-sized bootstrap allocation")]
    ZeroSized,
    #[error("bootstrap allocation size overflows")]
    SizeOverflow,
    #[error("the page provider could not back the bootstrap region")]
    OutOfPages,
    #[error("bootstrap page {actual:#x} does not follow {expected:#x}")]
    Discontiguous { expected: u64, actual: u64 },
}
