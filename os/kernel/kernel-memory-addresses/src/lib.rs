//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for 32-bit raw memory addresses and page bases used
//! by the paging layer, the page pool and the chunk heap.
//!
//! ## Overview
//!
//! The physical (PMA) and virtual (VMA) address spaces of a 32-bit protected
//! mode kernel are both 4 GiB wide, so every value here is a `u32`. The types
//! exist purely to keep the two spaces apart at compile time:
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Addresses translated by the page directory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Frames of installed RAM. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: 4 KiB pages, the granularity of every page table entry
//! - [`Size4M`]: 4 MiB, the span covered by one page directory entry
//!
//! ## Validation
//!
//! Addresses coming from wider integers (boot records, `usize` on a 64-bit
//! host running the test-suite) go through [`TryFrom`], which rejects anything
//! above 4 GiB with [`AddressError::OutOfRange`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_1234);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xC010_1000);
//! assert_eq!(off.as_u32(), 0x234);
//! assert_eq!(page.join(off), va);
//!
//! assert!(PhysicalAddress::try_from(0x1_0000_0000_u64).is_err());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod error;
mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use error::AddressError;
pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_4k() {
        let a = MemoryAddress::new(0x1234_5678);
        let (p, o) = a.split::<Size4K>();
        assert_eq!(p.base().as_u32() & 0xFFF, 0);
        assert_eq!(o.as_u32(), 0x678);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn split_and_join_4m() {
        let a = MemoryAddress::new(0xC04A_5678);
        let (p, o) = a.split::<Size4M>();
        assert_eq!(p.base().as_u32(), 0xC040_0000);
        assert_eq!(o.as_u32(), 0x000A_5678);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0xD000_0123);
        let (vp, vo) = va.split::<Size4K>();
        assert_eq!(vp.base(), VirtualAddress::new(0xD000_0000));
        assert_eq!(vo.as_u32(), 0x123);

        let pa = PhysicalAddress::new(0x0020_0042);
        let (pp, po) = pa.split::<Size4K>();
        assert_eq!(pp.base(), PhysicalAddress::new(0x0020_0000));
        assert_eq!(pp.join(po), pa);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x12000);
        assert_eq!(a.align_up::<Size4K>().map(MemoryAddress::as_u32), Some(0x13000));
        assert_eq!(MemoryAddress::new(0x13000).align_up::<Size4K>().map(MemoryAddress::as_u32), Some(0x13000));
        assert_eq!(MemoryAddress::new(0xFFFF_F001).align_up::<Size4K>(), None);
        assert!(a.is_aligned_to(5));
        assert!(!a.is_aligned_to(8));
    }

    #[test]
    fn wide_values_are_validated() {
        assert_eq!(
            VirtualAddress::try_from(0xFFFF_FFFF_u64),
            Ok(VirtualAddress::new(0xFFFF_FFFF))
        );
        assert_eq!(
            PhysicalAddress::try_from(0x1_0000_0000_u64),
            Err(AddressError::OutOfRange(0x1_0000_0000))
        );
        assert_eq!(
            VirtualPage::<Size4K>::try_from(VirtualAddress::new(0x1001)),
            Err(AddressError::Unaligned(0x1001))
        );
    }

    #[test]
    fn checked_arithmetic_does_not_wrap() {
        let va = VirtualAddress::new(0xFFFF_FFF8);
        assert_eq!(va.checked_add(8), None);
        assert_eq!(va.checked_add(7), Some(VirtualAddress::new(0xFFFF_FFFF)));
        assert_eq!(VirtualAddress::new(0x2000) - VirtualAddress::new(0x1000), 0x1000);
    }
}
