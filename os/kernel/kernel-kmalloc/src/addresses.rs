//! # Physical Address Types
//!
//! Two small wrappers keep raw physical addresses apart from the page bases
//! stored in the page backing table:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Any byte address in physical memory. |
//! | [`PhysicalPage`] | A non-null, page-aligned page base. |
//!
//! `PhysicalPage` wraps a [`NonZeroU64`], so `Option<PhysicalPage>` has the
//! same representation as a `u64` where `0` means "no page". The page table
//! relies on this: zero-filled memory is a table of unbacked entries.

use crate::geometry::PAGE_SIZE;
use core::fmt;
use core::num::NonZeroU64;

/// Page size as `u64`, for address arithmetic.
pub(crate) const PAGE_BYTES: u64 = PAGE_SIZE as u64;

/// A raw physical byte address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address `bytes` past `self`, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#018x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Base of a physical page. Never zero, always page aligned.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(NonZeroU64);

impl PhysicalPage {
    /// Wraps `base` if it is non-zero and page aligned.
    #[inline]
    #[must_use]
    pub const fn new(base: u64) -> Option<Self> {
        if base % PAGE_BYTES != 0 {
            return None;
        }
        match NonZeroU64::new(base) {
            Some(base) => Some(Self(base)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0.get())
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }

    /// The page `count` pages after `self`, or `None` on overflow.
    #[inline]
    #[must_use]
    pub fn checked_forward(self, count: usize) -> Option<Self> {
        let bytes = u64::try_from(count).ok()?.checked_mul(PAGE_BYTES)?;
        Self::new(self.0.get().checked_add(bytes)?)
    }

    /// The address `offset` bytes into the page, or `None` past its end.
    #[inline]
    #[must_use]
    pub fn byte(self, offset: usize) -> Option<PhysicalAddress> {
        let offset = u64::try_from(offset).ok().filter(|&o| o < PAGE_BYTES)?;
        self.base().checked_add(offset)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#018x})", self.0.get())
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn option_page_is_a_plain_word() {
        assert_eq!(size_of::<Option<PhysicalPage>>(), size_of::<u64>());
    }

    #[test]
    fn page_rejects_null_and_unaligned() {
        assert!(PhysicalPage::new(0).is_none());
        assert!(PhysicalPage::new(0x1001).is_none());
        assert_eq!(PhysicalPage::new(0x2000).map(PhysicalPage::as_u64), Some(0x2000));
    }

    #[test]
    fn forward_and_byte_offsets() {
        let page = PhysicalPage::new(0x5000).unwrap();
        assert_eq!(page.checked_forward(2).unwrap().as_u64(), 0x7000);
        assert_eq!(page.checked_forward(0), Some(page));
        assert!(PhysicalPage::new(u64::MAX - 0xFFF).unwrap().checked_forward(1).is_none());

        assert_eq!(page.byte(0), Some(PhysicalAddress::new(0x5000)));
        assert_eq!(page.byte(0x123), Some(PhysicalAddress::new(0x5123)));
        assert_eq!(page.byte(PAGE_SIZE), None);
    }
}
