//! # Allocation Engine
//!
//! [`Kmalloc`] ties the pieces together:
//!
//! ```text
//! allocate(size)                              free(ptr)
//!   │ chunks = ⌈(size + header) / chunk⌉        │ read header at ptr - header
//!   ▼                                           ▼
//! ChunkBitmap::find_run ── first fit         checksum, range, placement, bits
//!   │                                           │ (any failure poisons the heap)
//!   ▼                                           ▼
//! back every touched page ◄── PageProvider   clear bits
//!   │                                           │
//!   ▼                                           ▼
//! set bits, write header, return payload     release pages left without chunks
//! ```
//!
//! ## Invariants
//! - Every live allocation owns exactly the chunks
//!   `start_chunk .. start_chunk + HEADER_CHUNKS + chunk_size` of its header.
//! - Between calls, a page is backed exactly when one of its chunks is set.
//! - A run spanning several pages is backed by consecutive physical pages,
//!   so the returned pointer addresses one linear range.
//!
//! Failed requests leave bitmap, page table and provider as they were.

use crate::addresses::{PhysicalAddress, PhysicalPage};
use crate::bitmap::ChunkBitmap;
use crate::bootstrap::BootstrapAllocator;
use crate::error::{BootstrapError, Corruption, InitError, KmallocError};
use crate::geometry::{
    CHUNK_SIZE, CHUNKS_PER_PAGE, HEADER_CHUNKS, HEADER_SIZE, chunks_for_bytes, offset_in_page,
    page_of_chunk,
};
use crate::header::{AllocationHeader, calculate_checksum};
use crate::pages::PageBackingTable;
use crate::phys_mapper::PhysMapper;
use crate::provider::PageProvider;
use crate::stats::KmallocStats;
use core::ops::{Range, RangeInclusive};
use core::ptr::{self, NonNull};
use log::{debug, error, trace};

/// Kernel heap over a fixed universe of chunks.
pub struct Kmalloc<'m, P: PageProvider, M: PhysMapper> {
    pool: ChunkBitmap<'m>,
    pages: PageBackingTable<'m>,
    provider: P,
    mapper: M,
    stats: KmallocStats,
    poisoned: bool,
}

/// Why a candidate run could not be committed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CommitFailure {
    OutOfPages,
    /// Heap page `split` is not backed by the physical page following that of
    /// `split - 1`.
    Discontiguous {
        first: usize,
        last: usize,
        split: usize,
    },
}

impl<'m, P: PageProvider, M: PhysMapper> Kmalloc<'m, P, M> {
    /// Sizes the chunk universe from `provider.available_memory()` and builds
    /// the bitmap and page table from bootstrap memory.
    ///
    /// # Safety
    /// Every page the provider hands out, including the bootstrap pages kept
    /// by the returned allocator, must stay mapped through `mapper` and
    /// otherwise unused for all of `'m`.
    ///
    /// # Errors
    /// - [`InitError::NoMemory`] if the provider reports less than one chunk.
    /// - [`InitError::Bootstrap`] if the tables cannot be backed. Pages taken
    ///   for the tables up to that point are returned to the provider.
    pub unsafe fn init(mut provider: P, mapper: M) -> Result<Self, InitError> {
        let chunk_count = provider.available_memory() / CHUNK_SIZE;
        if chunk_count == 0 {
            return Err(InitError::NoMemory);
        }

        let mut boot = BootstrapAllocator::new(&mut provider, &mapper);
        // SAFETY: forwarded from the caller.
        let (pool, pages) = match unsafe { Self::carve_tables(&mut boot, chunk_count) } {
            Ok(tables) => tables,
            Err(err) => {
                boot.release_all();
                return Err(err.into());
            }
        };
        let bootstrap_pages = boot.pages_acquired();

        debug!(
            "kmalloc: {chunk_count} chunks of {CHUNK_SIZE} bytes, bitmap {} bytes, {} heap pages, {bootstrap_pages} bootstrap pages",
            pool.len(),
            pages.len(),
        );

        Ok(Self {
            pool: ChunkBitmap::new(pool, chunk_count),
            pages: PageBackingTable::new(pages),
            provider,
            mapper,
            stats: KmallocStats::new(bootstrap_pages),
            poisoned: false,
        })
    }

    /// Bitmap and page table storage for `chunk_count` chunks.
    ///
    /// # Safety
    /// Same as [`init`](Self::init).
    unsafe fn carve_tables(
        boot: &mut BootstrapAllocator<'_, P, M>,
        chunk_count: usize,
    ) -> Result<(&'m mut [u8], &'m mut [Option<PhysicalPage>]), BootstrapError> {
        // SAFETY: forwarded from the caller.
        let pool = unsafe { boot.alloc_slice::<u8>(ChunkBitmap::bytes_for(chunk_count))? };
        // SAFETY: forwarded from the caller.
        let pages = unsafe {
            boot.alloc_slice::<Option<PhysicalPage>>(PageBackingTable::entries_for(chunk_count))?
        };
        Ok((pool, pages))
    }

    /// Number of chunks in the universe.
    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.pool.chunk_count()
    }

    #[must_use]
    pub const fn pool(&self) -> &ChunkBitmap<'m> {
        &self.pool
    }

    #[must_use]
    pub const fn pages(&self) -> &PageBackingTable<'m> {
        &self.pages
    }

    #[must_use]
    pub const fn stats(&self) -> &KmallocStats {
        &self.stats
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Whether corruption was detected; a poisoned heap refuses all requests.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Allocates `size` bytes and returns a pointer to the payload.
    ///
    /// The payload is chunk aligned and not initialized.
    ///
    /// # Errors
    /// - [`KmallocError::ZeroSize`] for `size == 0`.
    /// - [`KmallocError::OutOfMemory`] if no free run is long enough.
    /// - [`KmallocError::OutOfPages`] if the provider cannot back the run.
    /// - [`KmallocError::Discontiguous`] if free runs exist, but every one of
    ///   them crosses heap pages not backed by consecutive physical pages.
    /// - [`KmallocError::Poisoned`] after corruption was detected.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, KmallocError> {
        self.ensure_healthy()?;
        if size == 0 {
            return Err(KmallocError::ZeroSize);
        }

        let payload_chunks = chunks_for_bytes(size);
        let result = self.allocate_chunks(payload_chunks);
        if result.is_err() {
            self.stats.record_failure();
        }
        result
    }

    /// As [`allocate`](Self::allocate), with the payload zero-filled.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<NonNull<u8>, KmallocError> {
        let payload = self.allocate(size)?;
        // SAFETY: the payload spans at least `size` writable bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, size) };
        Ok(payload)
    }

    /// Releases the allocation whose payload starts at `ptr`.
    ///
    /// Pages left without any occupied chunk are handed back to the provider.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on this
    /// allocator. A second free of the same pointer is detected only while
    /// the page holding its header is still backed.
    ///
    /// # Errors
    /// - [`KmallocError::Corruption`] if the header fails validation; the
    ///   allocator is poisoned and the bitmap is left untouched.
    /// - [`KmallocError::Poisoned`] after corruption was detected.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), KmallocError> {
        self.ensure_healthy()?;

        // SAFETY: forwarded from the caller.
        let (header, chunks) = unsafe { self.validated_header(ptr)? };

        self.pool.clear_range(chunks.clone());
        self.release_clear_pages(page_of_chunk(chunks.start)..=page_of_chunk(chunks.end - 1));
        self.stats.record_free(chunks.len());

        trace!(
            "kfree: freed {} chunks ({} bytes) at {ptr:p} (chunk {}) with checksum {}",
            header.chunk_size(),
            header.chunk_size() * CHUNK_SIZE,
            header.start_chunk(),
            header.checksum(),
        );
        Ok(())
    }

    /// Payload capacity in bytes of the live allocation at `ptr`.
    ///
    /// # Safety
    /// Same as [`free`](Self::free).
    ///
    /// # Errors
    /// Same validation failures as [`free`](Self::free).
    pub unsafe fn usable_size(&mut self, ptr: NonNull<u8>) -> Result<usize, KmallocError> {
        self.ensure_healthy()?;
        // SAFETY: forwarded from the caller.
        let (header, _) = unsafe { self.validated_header(ptr)? };
        Ok(header.chunk_size() * CHUNK_SIZE)
    }

    const fn ensure_healthy(&self) -> Result<(), KmallocError> {
        if self.poisoned {
            Err(KmallocError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn allocate_chunks(&mut self, payload_chunks: usize) -> Result<NonNull<u8>, KmallocError> {
        let needed = payload_chunks
            .checked_add(HEADER_CHUNKS)
            .ok_or(KmallocError::OutOfMemory { chunks: usize::MAX })?;

        // A refused run is retried from the page behind its physical break;
        // every start before that page would cross the same break.
        let mut from = 0;
        let mut refused = None;
        let (start, header_addr) = loop {
            let Some(start) = self.pool.find_run_from(needed, from) else {
                return Err(refused.unwrap_or(KmallocError::OutOfMemory { chunks: needed }));
            };
            match self.commit(start..start + needed) {
                Ok(addr) => break (start, addr),
                Err(CommitFailure::OutOfPages) => return Err(KmallocError::OutOfPages),
                Err(CommitFailure::Discontiguous { first, last, split }) => {
                    trace!("kmalloc: run at chunk {start} breaks before heap page {split}");
                    refused.get_or_insert(KmallocError::Discontiguous { first, last });
                    from = split * CHUNKS_PER_PAGE;
                }
            }
        };
        let header = AllocationHeader::new(start, payload_chunks);
        let header_ptr = self.mapper.phys_to_ptr(header_addr);

        // SAFETY: the run is backed by consecutive pages and owned by this
        // allocation; it spans more than the header.
        let payload = unsafe {
            header.write_to(header_ptr);
            NonNull::new_unchecked(header_ptr.add(HEADER_SIZE))
        };
        self.stats.record_allocation(needed);

        trace!(
            "kmalloc: allocated {payload_chunks} chunks ({} bytes) at {payload:p} (chunk {start}) with checksum {}",
            payload_chunks * CHUNK_SIZE,
            header.checksum(),
        );
        Ok(payload)
    }

    /// Backs every page touched by `chunks`, marks the chunks occupied and
    /// returns the physical address of the first chunk.
    fn commit(&mut self, chunks: Range<usize>) -> Result<PhysicalAddress, CommitFailure> {
        let first = page_of_chunk(chunks.start);
        let last = page_of_chunk(chunks.end - 1);

        for page in first..=last {
            if self.pages.is_backed(page) {
                continue;
            }
            let Some(backing) = self.provider.acquire_page() else {
                self.release_clear_pages(first..=page);
                return Err(CommitFailure::OutOfPages);
            };
            debug!("kmalloc: acquired physical page {backing} for heap page {page}");
            self.pages.back(page, backing);
            self.stats.page_backed();
        }

        if let Some(split) = self.physical_break(first..=last) {
            self.release_clear_pages(first..=last);
            return Err(CommitFailure::Discontiguous { first, last, split });
        }
        // the first page is backed at this point
        let Some(address) = self.chunk_address(chunks.start) else {
            self.release_clear_pages(first..=last);
            return Err(CommitFailure::OutOfPages);
        };

        self.pool.set_range(chunks);
        Ok(address)
    }

    /// First page in `pages` whose backing does not directly follow that of
    /// the page before it.
    fn physical_break(&self, pages: RangeInclusive<usize>) -> Option<usize> {
        let first = *pages.start();
        let base = self.pages.get(first);
        pages.skip(1).find(|&page| {
            let expected = base.and_then(|base| base.checked_forward(page - first));
            expected.is_none() || self.pages.get(page) != expected
        })
    }

    /// Physical address of `chunk`, if its page is backed.
    fn chunk_address(&self, chunk: usize) -> Option<PhysicalAddress> {
        self.pages
            .get(page_of_chunk(chunk))?
            .byte(offset_in_page(chunk))
    }

    /// Returns every backed page in `pages` whose chunks are all free.
    fn release_clear_pages(&mut self, pages: RangeInclusive<usize>) {
        for page in pages {
            if !self.pool.is_page_clear(page) {
                continue;
            }
            if let Some(backing) = self.pages.unback(page) {
                self.provider.release_page(backing);
                self.stats.page_released();
                debug!("kfree: released physical page {backing} of heap page {page}");
            }
        }
    }

    /// Reads and checks the header in front of `ptr`, poisoning the
    /// allocator if it is damaged. Returns the header and the chunks it owns.
    ///
    /// # Safety
    /// The [`HEADER_SIZE`] bytes before `ptr` must be readable.
    unsafe fn validated_header(
        &mut self,
        ptr: NonNull<u8>,
    ) -> Result<(AllocationHeader, Range<usize>), KmallocError> {
        // SAFETY: forwarded from the caller.
        let checked = unsafe { self.check_header(ptr) };
        checked.map_err(|corruption| {
            self.poisoned = true;
            error!("kmalloc: {corruption}; refusing further requests");
            KmallocError::Corruption(corruption)
        })
    }

    /// # Safety
    /// The [`HEADER_SIZE`] bytes before `ptr` must be readable.
    unsafe fn check_header(
        &self,
        ptr: NonNull<u8>,
    ) -> Result<(AllocationHeader, Range<usize>), Corruption> {
        let header_ptr = ptr.as_ptr().wrapping_sub(HEADER_SIZE);
        let header_at = header_ptr.addr();

        // SAFETY: forwarded from the caller.
        let image = unsafe { AllocationHeader::read_from(header_ptr) };
        let residue = calculate_checksum(&image);
        if residue != 0 {
            return Err(Corruption::Checksum {
                header: header_at,
                residue,
            });
        }

        let header = AllocationHeader::from_bytes(&image);
        let start = header.start_chunk();
        let end = match header.end_chunk() {
            Some(end) if end <= self.chunk_count() => end,
            end => {
                return Err(Corruption::OutOfRange {
                    header: header_at,
                    start,
                    end: end.unwrap_or(usize::MAX),
                    chunk_count: self.chunk_count(),
                });
            }
        };

        let expected = self
            .chunk_address(start)
            .map(|addr| self.mapper.phys_to_ptr(addr));
        if expected != Some(header_ptr) {
            return Err(Corruption::Misplaced {
                header: header_at,
                start,
            });
        }

        if let Some(chunk) = self.pool.first_clear(start..end) {
            return Err(Corruption::ChunkNotAllocated { chunk });
        }

        Ok((header, start..end))
    }
}
