//! # Bootstrap Allocator
//!
//! A bump allocator that carves the allocator's own bookkeeping (the chunk
//! bitmap and the page backing table) out of pages taken directly from the
//! [`PageProvider`], before any general-purpose allocation is possible.
//!
//! ## WARNING
//!
//! - Memory handed out here is **never freed**.
//! - The allocator is consumed by [`Kmalloc::init`](crate::Kmalloc::init); it
//!   is not meant to serve anything after the heap is online.
//!
//! ## Behavior
//! - The cursor is set lazily to the base of a freshly acquired page.
//! - Each request is word aligned. Pages are acquired one by one until the
//!   request fits below the end of the backed region; every new page must
//!   directly follow the previous one, since the region is used linearly.
//! - The requested bytes are zero-filled before the address is returned.
//! - If setup fails half way, [`BootstrapAllocator::release_all`] hands the
//!   whole region back.

use crate::addresses::{PAGE_BYTES, PhysicalAddress, PhysicalPage};
use crate::error::BootstrapError;
use crate::geometry::CHUNK_SIZE;
use crate::phys_mapper::PhysMapper;
use crate::provider::PageProvider;
use core::{ptr, slice};
use log::debug;

/// Bump state over the linear bootstrap region.
#[derive(Debug, Copy, Clone)]
struct Cursor {
    /// Start of the region.
    base: u64,
    /// Next free byte.
    next: u64,
    /// End of the backed region.
    backed_end: u64,
}

/// Append-only allocator used to build the engine's own tables.
pub struct BootstrapAllocator<'a, P: PageProvider, M: PhysMapper> {
    provider: &'a mut P,
    mapper: &'a M,
    cursor: Option<Cursor>,
    pages_acquired: usize,
}

/// Types for which the all-zero bit pattern is a valid value.
///
/// # Safety
/// Implementors must be valid when zero-initialized.
pub(crate) unsafe trait ZeroInit {}

unsafe impl ZeroInit for u8 {}
unsafe impl ZeroInit for Option<PhysicalPage> {}

impl<'a, P: PageProvider, M: PhysMapper> BootstrapAllocator<'a, P, M> {
    pub const fn new(provider: &'a mut P, mapper: &'a M) -> Self {
        Self {
            provider,
            mapper,
            cursor: None,
            pages_acquired: 0,
        }
    }

    /// Number of pages taken from the provider so far.
    #[must_use]
    pub const fn pages_acquired(&self) -> usize {
        self.pages_acquired
    }

    /// Reserves `length` elements of `element_size` bytes, zero-filled.
    ///
    /// Returns the physical address of the first byte.
    ///
    /// # Errors
    /// - [`BootstrapError::ZeroSized`] if either argument is zero.
    /// - [`BootstrapError::SizeOverflow`] if the request does not fit the
    ///   address space.
    /// - [`BootstrapError::OutOfPages`] / [`BootstrapError::Discontiguous`]
    ///   if the provider cannot extend the region linearly.
    pub fn alloc(
        &mut self,
        element_size: usize,
        length: usize,
    ) -> Result<PhysicalAddress, BootstrapError> {
        self.reserve(element_size, length, CHUNK_SIZE)
    }

    /// Reserves a zero-filled slice of `length` values of `T`.
    ///
    /// # Safety
    /// The returned slice aliases provider memory. The caller picks `'m` and
    /// must ensure the provider keeps that memory mapped (through the mapper)
    /// and untouched for all of `'m`.
    pub(crate) unsafe fn alloc_slice<'m, T: ZeroInit>(
        &mut self,
        length: usize,
    ) -> Result<&'m mut [T], BootstrapError> {
        let align = align_of::<T>().max(CHUNK_SIZE);
        let start = self.reserve(size_of::<T>(), length, align)?;
        let ptr = self.mapper.phys_to_ptr(start).cast::<T>();
        // SAFETY: the range was just reserved, zero-filled and is suitably
        // aligned; zero is a valid `T` and the caller vouches for `'m`.
        Ok(unsafe { slice::from_raw_parts_mut(ptr, length) })
    }

    fn reserve(
        &mut self,
        element_size: usize,
        length: usize,
        align: usize,
    ) -> Result<PhysicalAddress, BootstrapError> {
        if element_size == 0 || length == 0 {
            return Err(BootstrapError::ZeroSized);
        }

        let bytes = element_size
            .checked_mul(length)
            .ok_or(BootstrapError::SizeOverflow)?;
        let size = u64::try_from(bytes).map_err(|_| BootstrapError::SizeOverflow)?;
        let align = u64::try_from(align).map_err(|_| BootstrapError::SizeOverflow)?;

        let mut cursor = self.cursor()?;
        let start = cursor
            .next
            .checked_next_multiple_of(align)
            .ok_or(BootstrapError::SizeOverflow)?;
        let end = start
            .checked_add(size)
            .ok_or(BootstrapError::SizeOverflow)?;

        let mut pages = 0usize;
        while cursor.backed_end < end {
            cursor.backed_end = self.extend(cursor.backed_end)?;
            self.cursor = Some(cursor);
            pages += 1;
        }

        // SAFETY: [start, end) lies inside the linearly backed region that
        // only the bootstrap allocator hands out.
        unsafe {
            ptr::write_bytes(
                self.mapper.phys_to_ptr(PhysicalAddress::new(start)),
                0,
                bytes,
            );
        }

        cursor.next = end;
        self.cursor = Some(cursor);

        debug!("kmalloc bootstrap: acquired {pages} pages for {size} bytes at {start:#x}");
        Ok(PhysicalAddress::new(start))
    }

    /// The cursor, acquiring the first page on first use.
    fn cursor(&mut self) -> Result<Cursor, BootstrapError> {
        if let Some(cursor) = self.cursor {
            return Ok(cursor);
        }

        let page = self
            .provider
            .acquire_page()
            .ok_or(BootstrapError::OutOfPages)?;
        self.pages_acquired += 1;

        let cursor = Cursor {
            base: page.as_u64(),
            next: page.as_u64(),
            backed_end: page.as_u64() + PAGE_BYTES,
        };
        self.cursor = Some(cursor);
        Ok(cursor)
    }

    /// Backs the page at `expected`, returning the new end of the region.
    fn extend(&mut self, expected: u64) -> Result<u64, BootstrapError> {
        let page = self
            .provider
            .acquire_page()
            .ok_or(BootstrapError::OutOfPages)?;

        if page.as_u64() != expected {
            self.provider.release_page(page);
            return Err(BootstrapError::Discontiguous {
                expected,
                actual: page.as_u64(),
            });
        }

        self.pages_acquired += 1;
        Ok(expected + PAGE_BYTES)
    }

    /// Returns every page of the region to the provider.
    ///
    /// Used when setup fails after some tables were carved out; anything
    /// handed out by this allocator must no longer be in use.
    pub(crate) fn release_all(mut self) {
        let Some(cursor) = self.cursor.take() else {
            return;
        };

        let mut released = 0usize;
        let mut base = cursor.base;
        while base < cursor.backed_end {
            if let Some(page) = PhysicalPage::new(base) {
                self.provider.release_page(page);
                released += 1;
            }
            base += PAGE_BYTES;
        }
        self.pages_acquired -= released;
        debug!("kmalloc bootstrap: released {released} pages after failed setup");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::PAGE_SIZE;
    use crate::phys_mapper::IdentityPhysMapper;
    use crate::testing::ArenaPages;

    #[test]
    fn first_use_takes_one_page() {
        let mut arena = ArenaPages::new(4, 0);
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        let first = boot.alloc(1, 16).unwrap();
        assert_eq!(boot.pages_acquired(), 1);

        let second = boot.alloc(8, 2).unwrap();
        assert_eq!(second.as_u64(), first.as_u64() + 16);
        assert_eq!(boot.pages_acquired(), 1);
        assert_eq!(arena.outstanding(), 1);
    }

    #[test]
    fn requests_are_word_aligned() {
        let mut arena = ArenaPages::new(2, 0);
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        let first = boot.alloc(1, 3).unwrap();
        let second = boot.alloc(1, 1).unwrap();
        assert_eq!(second.as_u64() - first.as_u64(), u64::try_from(CHUNK_SIZE).unwrap());
    }

    #[test]
    fn large_request_spans_consecutive_pages() {
        let mut arena = ArenaPages::new(8, 0);
        let mapper = IdentityPhysMapper;
        let mut boot = BootstrapAllocator::new(&mut arena, &mapper);
        let size = 2 * PAGE_SIZE + 100;
        let start = boot.alloc(1, size).unwrap();
        assert_eq!(boot.pages_acquired(), 3);

        let bytes = unsafe { slice::from_raw_parts(mapper.phys_to_ptr(start), size) };
        assert!(bytes.iter().all(|&b| b == 0), "bootstrap memory must be zeroed");
    }

    #[test]
    fn exact_page_fill_needs_no_extra_page() {
        let mut arena = ArenaPages::new(4, 0);
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        boot.alloc(1, PAGE_SIZE).unwrap();
        assert_eq!(boot.pages_acquired(), 1);
        boot.alloc(1, 1).unwrap();
        assert_eq!(boot.pages_acquired(), 2);
    }

    #[test]
    fn rejects_zero_and_overflow() {
        let mut arena = ArenaPages::new(1, 0);
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        assert_eq!(boot.alloc(0, 4), Err(BootstrapError::ZeroSized));
        assert_eq!(boot.alloc(4, 0), Err(BootstrapError::ZeroSized));
        assert_eq!(boot.alloc(usize::MAX, 2), Err(BootstrapError::SizeOverflow));
        assert_eq!(boot.pages_acquired(), 0);
    }

    #[test]
    fn scattered_pages_are_refused() {
        let mut arena = ArenaPages::new(4, 0).descending();
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        let err = boot.alloc(1, PAGE_SIZE + 1).unwrap_err();
        assert!(matches!(err, BootstrapError::Discontiguous { .. }));
        assert_eq!(boot.pages_acquired(), 1);
        assert_eq!(arena.outstanding(), 1);
    }

    #[test]
    fn release_all_returns_the_region() {
        let mut arena = ArenaPages::new(4, 0);
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        boot.alloc(1, 2 * PAGE_SIZE + 1).unwrap();
        assert_eq!(boot.pages_acquired(), 3);
        assert_eq!(boot.alloc(1, 2 * PAGE_SIZE), Err(BootstrapError::OutOfPages));

        boot.release_all();
        assert_eq!(arena.outstanding(), 0);
        assert_eq!(arena.released(), 4);
    }

    #[test]
    fn release_all_before_first_use_is_a_no_op() {
        let mut arena = ArenaPages::new(1, 0);
        BootstrapAllocator::new(&mut arena, &IdentityPhysMapper).release_all();
        assert_eq!(arena.acquired(), 0);
        assert_eq!(arena.released(), 0);
    }

    #[test]
    fn exhausted_provider() {
        let mut arena = ArenaPages::new(1, 0);
        let mut boot = BootstrapAllocator::new(&mut arena, &IdentityPhysMapper);
        assert_eq!(boot.alloc(1, PAGE_SIZE + 1), Err(BootstrapError::OutOfPages));
    }
}
