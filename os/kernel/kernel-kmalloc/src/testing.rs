//! Host-side page provider for tests.
//!
//! Pages come from one page-aligned heap allocation and are handed out
//! lowest-first (or highest-first, see [`ArenaPages::descending`]). Freshly
//! acquired pages are filled with [`JUNK`] so tests notice missing
//! initialization. Physical addresses equal host addresses; use
//! [`IdentityPhysMapper`](crate::IdentityPhysMapper).

use crate::addresses::PhysicalPage;
use crate::geometry::PAGE_SIZE;
use crate::provider::PageProvider;
use core::ptr::{self, NonNull};

/// Byte pattern written into pages when they are acquired.
pub const JUNK: u8 = 0xA5;

#[repr(C, align(4096))]
struct Frame([u8; PAGE_SIZE]);

pub struct ArenaPages {
    frames: NonNull<Frame>,
    count: usize,
    in_use: Vec<bool>,
    available: usize,
    descending: bool,
    acquired: usize,
    released: usize,
}

impl ArenaPages {
    /// An arena of `frames` pages reporting `available` bytes of memory.
    pub fn new(frames: usize, available: usize) -> Self {
        let boxed: Box<[Frame]> = (0..frames).map(|_| Frame([0; PAGE_SIZE])).collect();
        let frames_ptr = NonNull::new(Box::into_raw(boxed).cast::<Frame>())
            .expect("box pointers are never null");
        Self {
            frames: frames_ptr,
            count: frames,
            in_use: vec![false; frames],
            available,
            descending: false,
            acquired: 0,
            released: 0,
        }
    }

    /// An arena reporting room for `pages` heap pages, with `spare` extra
    /// frames for the bootstrap tables.
    pub fn for_heap_pages(pages: usize, spare: usize) -> Self {
        Self::new(pages + spare, pages * PAGE_SIZE)
    }

    /// Hand out the highest free frame first.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Frames currently acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.in_use.iter().filter(|&&used| used).count()
    }

    pub fn acquired(&self) -> usize {
        self.acquired
    }

    pub fn released(&self) -> usize {
        self.released
    }

    fn base(&self, index: usize) -> u64 {
        self.frames.as_ptr() as u64 + (index * PAGE_SIZE) as u64
    }

    fn pick_free(&self) -> Option<usize> {
        let mut free = (0..self.count).filter(|&index| !self.in_use[index]);
        if self.descending {
            free.next_back()
        } else {
            free.next()
        }
    }
}

// SAFETY: the arena exclusively owns its frames; the pointer is never shared.
unsafe impl Send for ArenaPages {}

unsafe impl PageProvider for ArenaPages {
    fn available_memory(&self) -> usize {
        self.available
    }

    fn acquire_page(&mut self) -> Option<PhysicalPage> {
        let index = self.pick_free()?;
        self.in_use[index] = true;
        self.acquired += 1;
        // SAFETY: `index` is inside the arena and the frame is not in use.
        unsafe {
            ptr::write_bytes(self.frames.as_ptr().add(index).cast::<u8>(), JUNK, PAGE_SIZE);
        }
        PhysicalPage::new(self.base(index))
    }

    fn release_page(&mut self, page: PhysicalPage) {
        let offset = page.as_u64() - self.base(0);
        let index = usize::try_from(offset).unwrap() / PAGE_SIZE;
        assert!(index < self.count, "page {page} is not part of the arena");
        assert!(self.in_use[index], "page {page} released twice");
        self.in_use[index] = false;
        self.released += 1;
    }
}

impl Drop for ArenaPages {
    fn drop(&mut self) {
        let frames = ptr::slice_from_raw_parts_mut(self.frames.as_ptr(), self.count);
        // SAFETY: the pointer came from `Box::into_raw` with the same length.
        drop(unsafe { Box::from_raw(frames) });
    }
}
