//! # Global Kernel Heap
//!
//! [`LockedKmalloc`] wraps a [`Kmalloc`] in a spin lock so it can serve as
//! the kernel's `#[global_allocator]`:
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: LockedKmalloc<BootFrames, HhdmPhysMapper> = LockedKmalloc::new();
//!
//! // once the frame allocator and the HHDM are up:
//! unsafe { HEAP.init(frames, HhdmPhysMapper::new(hhdm_offset)) }?;
//! ```
//!
//! Requests arriving before [`LockedKmalloc::init`] return null.
//!
//! ## Constraints
//! - Payloads are aligned to [`CHUNK_SIZE`]; layouts asking for more return
//!   null.
//! - `dealloc` ignores the layout size; the header records it.
//! - Interrupts are not masked while the lock is held.

use crate::error::InitError;
use crate::geometry::CHUNK_SIZE;
use crate::kmalloc::Kmalloc;
use crate::phys_mapper::PhysMapper;
use crate::provider::PageProvider;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use log::{debug, error, warn};
use spin::Mutex;

/// A [`Kmalloc`] behind a spin lock, installable as the global allocator.
pub struct LockedKmalloc<P: PageProvider, M: PhysMapper> {
    inner: Mutex<Option<Kmalloc<'static, P, M>>>,
}

impl<P: PageProvider, M: PhysMapper> LockedKmalloc<P, M> {
    /// An uninitialized heap; every allocation fails until [`init`](Self::init).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Brings the heap online.
    ///
    /// # Safety
    /// Same as [`Kmalloc::init`], with `'static` as the lifetime: the
    /// provider's pages must stay mapped through `mapper` forever.
    ///
    /// # Errors
    /// [`InitError::AlreadyInitialized`] on a second call, otherwise whatever
    /// [`Kmalloc::init`] reports.
    pub unsafe fn init(&self, provider: P, mapper: M) -> Result<(), InitError> {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(InitError::AlreadyInitialized);
        }

        // SAFETY: forwarded from the caller.
        let kmalloc = unsafe { Kmalloc::init(provider, mapper)? };
        debug!(
            "kmalloc: global heap online with {} chunks",
            kmalloc.chunk_count()
        );
        *inner = Some(kmalloc);
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Runs `f` on the heap while holding the lock.
    ///
    /// Returns `None` if the heap is not initialized. `f` must not allocate.
    pub fn with_kmalloc<R>(&self, f: impl FnOnce(&mut Kmalloc<'static, P, M>) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }
}

impl<P: PageProvider, M: PhysMapper> Default for LockedKmalloc<P, M> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<P, M> GlobalAlloc for LockedKmalloc<P, M>
where
    P: PageProvider + Send,
    M: PhysMapper + Send,
{
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > CHUNK_SIZE {
            warn!(
                "kmalloc: alignment {} exceeds chunk alignment {CHUNK_SIZE}",
                layout.align()
            );
            return ptr::null_mut();
        }

        match self.with_kmalloc(|heap| heap.allocate(layout.size())) {
            Some(Ok(payload)) => payload.as_ptr(),
            Some(Err(err)) => {
                warn!("kmalloc: allocation of {} bytes failed: {err}", layout.size());
                ptr::null_mut()
            }
            None => {
                warn!("kmalloc: allocation before heap initialization");
                ptr::null_mut()
            }
        }
    }

    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` must come from this allocator.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        // SAFETY: forwarded from the caller.
        match self.with_kmalloc(|heap| unsafe { heap.free(payload) }) {
            Some(Ok(())) => {}
            Some(Err(err)) => error!("kmalloc: free of {ptr:p} failed: {err}"),
            None => error!("kmalloc: free of {ptr:p} before heap initialization"),
        }
    }

    /// Zeroing happens after the allocation succeeds.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::PAGE_SIZE;
    use crate::phys_mapper::IdentityPhysMapper;
    use crate::testing::ArenaPages;

    fn heap() -> LockedKmalloc<ArenaPages, IdentityPhysMapper> {
        let heap = LockedKmalloc::new();
        unsafe { heap.init(ArenaPages::for_heap_pages(2, 2), IdentityPhysMapper) }.unwrap();
        heap
    }

    #[test]
    fn heap_can_be_shared_across_threads() {
        fn assert_sync<T: Sync>(_: &T) {}
        let heap = heap();
        assert_sync(&heap);

        std::thread::scope(|s| {
            s.spawn(|| {
                let layout = Layout::new::<[u64; 4]>();
                let p = unsafe { heap.alloc(layout) };
                assert!(!p.is_null());
                unsafe { heap.dealloc(p, layout) };
            });
        });
        assert_eq!(heap.with_kmalloc(|k| k.stats().total_frees), Some(1));
    }

    #[test]
    fn uninitialized_heap_returns_null() {
        let heap = LockedKmalloc::<ArenaPages, IdentityPhysMapper>::default();
        assert!(!heap.is_initialized());
        assert!(unsafe { heap.alloc(Layout::new::<u64>()) }.is_null());
        assert_eq!(heap.with_kmalloc(|k| k.chunk_count()), None);
    }

    #[test]
    fn second_init_is_refused() {
        let heap = heap();
        assert!(heap.is_initialized());
        let again = unsafe { heap.init(ArenaPages::new(1, PAGE_SIZE), IdentityPhysMapper) };
        assert!(matches!(again, Err(InitError::AlreadyInitialized)));
    }

    #[test]
    fn over_aligned_layout_returns_null() {
        let heap = heap();
        let layout = Layout::from_size_align(32, 2 * CHUNK_SIZE).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
        assert_eq!(heap.with_kmalloc(|k| k.stats().total_allocations), Some(0));
    }

    #[test]
    fn alloc_zeroed_and_dealloc() {
        let heap = heap();
        let layout = Layout::array::<u32>(100).unwrap();
        let p = unsafe { heap.alloc_zeroed(layout) };
        assert!(!p.is_null());
        let words = unsafe { core::slice::from_raw_parts(p.cast::<u32>(), 100) };
        assert!(words.iter().all(|&w| w == 0));

        unsafe { heap.dealloc(p, layout) };
        assert_eq!(heap.with_kmalloc(|k| k.stats().live_allocations), Some(0));
    }

    #[test]
    fn failed_allocation_returns_null() {
        let heap = heap();
        let layout = Layout::from_size_align(16 * PAGE_SIZE, 1).unwrap();
        assert!(unsafe { heap.alloc(layout) }.is_null());
        assert_eq!(heap.with_kmalloc(|k| k.stats().failed_allocations), Some(1));
    }
}
