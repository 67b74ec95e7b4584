//! # Physical-to-Virtual Translation
//!
//! The page table of the allocator stores **physical** page bases, but headers
//! and payloads have to be written through pointers in the current address
//! space. A [`PhysMapper`] performs that translation.
//!
//! ## Strategies
//! - [`HhdmPhysMapper`]: every physical address is visible at
//!   `offset + pa` (higher-half direct map).
//! - [`IdentityPhysMapper`]: physical and virtual addresses coincide, as in
//!   early boot or in hosted tests.
//!
//! ## Example
//! ```rust
//! use kernel_kmalloc::{HhdmPhysMapper, PhysMapper, PhysicalAddress};
//! let mapper = HhdmPhysMapper::new(0xFFFF_8000_0000_0000);
//! let ptr = mapper.phys_to_ptr(PhysicalAddress::new(0x1234_0000));
//! assert_eq!(ptr as usize, 0xFFFF_8000_1234_0000);
//! ```

use crate::addresses::PhysicalAddress;

/// Converts physical addresses to pointers in the current address space.
///
/// # Safety
/// Implementors must return pointers through which the physical memory at
/// `pa` is readable and writable for as long as the allocator uses it.
/// Producing the pointer is safe; dereferencing it is up to the caller.
pub unsafe trait PhysMapper {
    /// Translate `pa` into a pointer.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;
}

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// The direct map must cover every page the provider hands out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl HhdmPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

unsafe impl PhysMapper for HhdmPhysMapper {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        self.offset.wrapping_add(pa.as_u64()) as usize as *mut u8
    }
}

/// [`PhysMapper`] for identity-mapped memory.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct IdentityPhysMapper;

unsafe impl PhysMapper for IdentityPhysMapper {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        pa.as_u64() as usize as *mut u8
    }
}
