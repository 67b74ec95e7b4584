//! # Kernel Heap Allocator
//!
//! This crate provides `kmalloc`, the general-purpose heap of the kernel. It
//! hands out word-granular blocks of memory, tracks them with a chunk bitmap
//! and backs the heap lazily with physical pages borrowed from the kernel's
//! frame allocator, returning those pages once they are empty again.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              LockedKmalloc (GlobalAlloc)            │
//! │    • spin lock around one Kmalloc                   │
//! │    • null on failure, chunk-aligned layouts only    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                   Kmalloc engine                    │
//! │    • first-fit search over the chunk bitmap         │
//! │    • checksummed header in front of each payload    │
//! │    • lazy page backing and reclamation              │
//! └───────┬─────────────────────────────────┬───────────┘
//!         │                                 │
//! ┌───────▼──────────────┐      ┌───────────▼───────────┐
//! │ ChunkBitmap          │      │ PageBackingTable      │
//! │  1 bit per chunk     │      │  heap page → frame    │
//! └───────┬──────────────┘      └───────────┬───────────┘
//!         └────── BootstrapAllocator ───────┘
//!                         │
//! ┌───────────────────────▼─────────────────────────────┐
//! │       PageProvider  +  PhysMapper (HHDM)            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Geometry ([`geometry`])
//! A chunk is one machine word; a page is 4 KiB. Every size in the allocator
//! is expressed in chunks, and the heap page of a chunk is its number divided
//! by [`CHUNKS_PER_PAGE`].
//!
//! ### Bootstrap ([`bootstrap`])
//! The bitmap and the page table are themselves dynamic memory. They are
//! carved out of provider pages by a bump allocator before the heap exists and
//! are never freed.
//!
//! ### Chunk Bitmap ([`bitmap`])
//! One bit per chunk, least significant bit first. The search skips whole
//! occupied bytes, which keeps densely used regions cheap to cross.
//!
//! ### Page Backing Table ([`pages`])
//! One entry per heap page, holding the physical page backing it. A page is
//! backed exactly when at least one of its chunks is allocated.
//!
//! ### Allocation Header ([`header`])
//! Three words in front of every payload: the start chunk, the payload size in
//! chunks and a one-byte checksum that makes the byte sum of the header zero.
//! `free` refuses a header that does not check out and poisons the heap.
//!
//! ## Usage Patterns
//!
//! ```rust
//! use kernel_kmalloc::{
//!     Kmalloc, IdentityPhysMapper, PageProvider, PhysicalPage, CHUNK_SIZE, PAGE_SIZE,
//! };
//!
//! #[repr(C, align(4096))]
//! struct Frame([u8; PAGE_SIZE]);
//!
//! /// Hands out frames from a leaked host buffer.
//! struct Frames(&'static mut [Frame], usize);
//!
//! unsafe impl PageProvider for Frames {
//!     fn available_memory(&self) -> usize {
//!         2 * PAGE_SIZE
//!     }
//!
//!     fn acquire_page(&mut self) -> Option<PhysicalPage> {
//!         let frame = self.0.get(self.1)?;
//!         self.1 += 1;
//!         PhysicalPage::new(frame as *const Frame as u64)
//!     }
//!
//!     fn release_page(&mut self, _page: PhysicalPage) {}
//! }
//!
//! let frames = Box::leak((0..8).map(|_| Frame([0; PAGE_SIZE])).collect::<Box<[_]>>());
//! let mut heap = unsafe { Kmalloc::init(Frames(frames, 0), IdentityPhysMapper) }?;
//!
//! let block = heap.allocate(100)?;
//! assert_eq!(block.as_ptr() as usize % CHUNK_SIZE, 0);
//! unsafe { heap.free(block) }?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Integration Points
//!
//! * A kernel implements [`PageProvider`] over its physical frame allocator
//!   and passes an [`HhdmPhysMapper`] for its higher half direct map.
//! * [`LockedKmalloc`] is installed as `#[global_allocator]` and initialized
//!   once both are available.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod addresses;
pub mod bitmap;
pub mod bootstrap;
pub mod error;
pub mod geometry;
pub mod header;
pub mod kmalloc;
pub mod locked;
pub mod pages;
pub mod phys_mapper;
pub mod provider;
pub mod stats;

#[cfg(test)]
mod testing;

pub use addresses::{PhysicalAddress, PhysicalPage};
pub use bitmap::ChunkBitmap;
pub use bootstrap::BootstrapAllocator;
pub use error::{BootstrapError, Corruption, InitError, KmallocError};
pub use geometry::{
    BITMAP_BYTES_PER_PAGE, CHUNK_SIZE, CHUNKS_PER_PAGE, HEADER_CHUNKS, HEADER_SIZE, PAGE_SIZE,
};
pub use header::{AllocationHeader, calculate_checksum};
pub use kmalloc::Kmalloc;
pub use locked::LockedKmalloc;
pub use pages::PageBackingTable;
pub use phys_mapper::{HhdmPhysMapper, IdentityPhysMapper, PhysMapper};
pub use provider::PageProvider;
pub use stats::KmallocStats;
