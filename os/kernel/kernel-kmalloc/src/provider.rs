//! # Physical Page Provider
//!
//! The allocator never owns physical memory. It borrows whole pages from a
//! [`PageProvider`] when a chunk run first touches a page and hands them back
//! once every chunk of that page is free again. The provider also decides how
//! large the chunk universe is, through [`PageProvider::available_memory`],
//! which is read exactly once when the engine is initialized.
//!
//! A kernel typically implements this on top of its physical frame allocator.

use crate::addresses::PhysicalPage;

/// Source of page-sized physical memory.
///
/// # Safety
/// Implementors must guarantee that
/// - every page returned by [`acquire_page`](Self::acquire_page) is
///   [`PAGE_SIZE`](crate::geometry::PAGE_SIZE) bytes of writable memory that
///   nothing else uses until it is passed to
///   [`release_page`](Self::release_page), and
/// - the memory stays reachable through the [`PhysMapper`](crate::PhysMapper)
///   the allocator was initialized with.
pub unsafe trait PageProvider {
    /// Total number of bytes the chunk universe may span.
    fn available_memory(&self) -> usize;

    /// Back one page. Returns `None` when the provider is exhausted.
    fn acquire_page(&mut self) -> Option<PhysicalPage>;

    /// Return a page obtained from [`acquire_page`](Self::acquire_page).
    fn release_page(&mut self, page: PhysicalPage);
}

unsafe impl<P: PageProvider + ?Sized> PageProvider for &mut P {
    #[inline]
    fn available_memory(&self) -> usize {
        (**self).available_memory()
    }

    #[inline]
    fn acquire_page(&mut self) -> Option<PhysicalPage> {
        (**self).acquire_page()
    }

    #[inline]
    fn release_page(&mut self, page: PhysicalPage) {
        (**self).release_page(page);
    }
}
