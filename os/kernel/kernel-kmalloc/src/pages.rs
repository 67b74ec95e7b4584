//! # Page Backing Table
//!
//! Maps every page of the chunk universe to the physical page currently
//! backing it, or to nothing. Entry `p` covers chunks
//! `p * CHUNKS_PER_PAGE .. (p + 1) * CHUNKS_PER_PAGE`.
//!
//! Entries are `Option<PhysicalPage>`, which has the layout of a plain `u64`
//! with `0` meaning "unbacked", so zero-filled bootstrap memory is a valid,
//! fully unbacked table.
//!
//! # Invariants
//! Outside of an allocate or free call, an entry is `Some` exactly when at
//! least one chunk of its page is set in the [`ChunkBitmap`](crate::ChunkBitmap).

use crate::addresses::PhysicalPage;
use crate::geometry::CHUNKS_PER_PAGE;

/// Per-page physical backing of the chunk universe.
pub struct PageBackingTable<'m> {
    entries: &'m mut [Option<PhysicalPage>],
}

impl<'m> PageBackingTable<'m> {
    /// Number of entries needed to cover `chunk_count` chunks.
    #[must_use]
    pub const fn entries_for(chunk_count: usize) -> usize {
        chunk_count.div_ceil(CHUNKS_PER_PAGE)
    }

    pub(crate) const fn new(entries: &'m mut [Option<PhysicalPage>]) -> Self {
        Self { entries }
    }

    /// Number of pages covered by the table.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Physical page backing `page`, if any.
    #[inline]
    #[must_use]
    pub fn get(&self, page: usize) -> Option<PhysicalPage> {
        self.entries[page]
    }

    #[inline]
    #[must_use]
    pub fn is_backed(&self, page: usize) -> bool {
        self.entries[page].is_some()
    }

    /// Records `backing` for a currently unbacked `page`.
    #[inline]
    pub(crate) fn back(&mut self, page: usize, backing: PhysicalPage) {
        debug_assert!(self.entries[page].is_none(), "page {page} is already backed");
        self.entries[page] = Some(backing);
    }

    /// Marks `page` unbacked, returning its previous backing.
    #[inline]
    pub(crate) fn unback(&mut self, page: usize) -> Option<PhysicalPage> {
        self.entries[page].take()
    }

    /// All entries, indexed by page number.
    #[must_use]
    pub fn entries(&self) -> &[Option<PhysicalPage>] {
        &*self.entries
    }

    /// Number of backed pages.
    #[must_use]
    pub fn backed_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn page(base: u64) -> PhysicalPage {
        PhysicalPage::new(base).unwrap()
    }

    #[test]
    fn sizing_rounds_up() {
        assert_eq!(PageBackingTable::entries_for(0), 0);
        assert_eq!(PageBackingTable::entries_for(1), 1);
        assert_eq!(PageBackingTable::entries_for(CHUNKS_PER_PAGE), 1);
        assert_eq!(PageBackingTable::entries_for(CHUNKS_PER_PAGE + 1), 2);
    }

    #[test]
    fn back_and_unback() {
        let mut storage = [None; 4];
        let mut table = PageBackingTable::new(&mut storage);
        assert_eq!(table.len(), 4);
        assert_eq!(table.backed_count(), 0);

        table.back(2, page(0x3000));
        assert!(table.is_backed(2));
        assert_eq!(table.get(2), Some(page(0x3000)));
        assert_eq!(table.backed_count(), 1);

        assert_eq!(table.unback(2), Some(page(0x3000)));
        assert_eq!(table.unback(2), None);
        assert_eq!(table.entries(), &[None; 4]);
    }

    #[test]
    fn zeroed_memory_is_unbacked() {
        let zeroed: [u64; 3] = [0; 3];
        // SAFETY: `Option<PhysicalPage>` is a `u64` with zero meaning `None`.
        let entries: [Option<PhysicalPage>; 3] = unsafe { core::mem::transmute(zeroed) };
        assert_eq!(entries, [None; 3]);
    }
}
