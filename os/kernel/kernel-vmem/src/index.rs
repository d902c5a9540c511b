//! Page number halves.

use crate::info::{DIRECTORY_SPAN, PAGE_ENTRIES};
use core::fmt;
use kernel_memory_addresses::{Size4K, Size4M, VirtualAddress};

/// Index into the page directory (VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// Index into a page table (VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl DirectoryIndex {
    /// Range is `0..1024` (checked in debug builds).
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        debug_assert!(index < PAGE_ENTRIES);
        Self((index % PAGE_ENTRIES) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress) -> Self {
        Self(va.page::<Size4M>().number() as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First virtual address covered by this directory entry.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0 as u32 * DIRECTORY_SPAN)
    }

    /// Byte offset of the entry inside the directory page.
    #[inline]
    #[must_use]
    pub const fn byte_offset(self) -> u32 {
        self.0 as u32 * 4
    }

    /// All 1024 indices in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..PAGE_ENTRIES).map(Self::new)
    }
}

impl TableIndex {
    /// Range is `0..1024` (checked in debug builds).
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        debug_assert!(index < PAGE_ENTRIES);
        Self((index % PAGE_ENTRIES) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress) -> Self {
        Self((va.page::<Size4K>().number() % PAGE_ENTRIES as u32) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Byte offset of the entry inside its page table.
    #[inline]
    #[must_use]
    pub const fn byte_offset(self) -> u32 {
        self.0 as u32 * 4
    }
}

impl fmt::Debug for DirectoryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PDE#{}", self.0)
    }
}

impl fmt::Display for DirectoryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for TableIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PTE#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_page_number() {
        let va = VirtualAddress::new(0xBFFF_F123);
        assert_eq!(DirectoryIndex::of(va).as_usize(), 767);
        assert_eq!(TableIndex::of(va).as_usize(), 1023);

        let va = VirtualAddress::new(0xC040_3000);
        assert_eq!(DirectoryIndex::of(va).as_usize(), 769);
        assert_eq!(TableIndex::of(va).as_usize(), 3);
    }

    #[test]
    fn directory_base_round_trips() {
        let idx = DirectoryIndex::new(768);
        assert_eq!(idx.base(), VirtualAddress::new(0xC000_0000));
        assert_eq!(DirectoryIndex::of(idx.base()), idx);
        assert_eq!(idx.byte_offset(), 3072);
    }
}
