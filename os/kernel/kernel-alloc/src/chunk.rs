//! Boundary tags and chunk address arithmetic.

use crate::DESCRIPTOR_SIZE;
use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// One boundary tag: a chunk size with the free flag in bit 0.
///
/// Both halves of a descriptor use this layout. For `size_prev` the flag
/// describes the *preceding* chunk.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Tag {
    pub free: bool,
    #[bits(2)]
    __: u8,
    #[bits(29)]
    units: u32,
}

impl Tag {
    /// The trailing tag of a heap: no successor yet.
    pub const END: Self = Self::new();

    #[must_use]
    pub const fn used(size: u32) -> Self {
        Self::new().with_units(size >> 3)
    }

    #[must_use]
    pub const fn unused(size: u32) -> Self {
        Self::used(size).with_free(true)
    }

    /// Size in bytes, flags masked.
    #[must_use]
    pub const fn size(self) -> u32 {
        self.units() << 3
    }
}

/// A chunk, named by the address of its user data.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct Chunk(VirtualAddress);

impl Chunk {
    #[inline]
    pub const fn at(vma: VirtualAddress) -> Self {
        Self(vma)
    }

    #[inline]
    pub const fn vma(self) -> VirtualAddress {
        self.0
    }

    /// `size_prev` half of the leading descriptor.
    #[inline]
    pub const fn size_prev_slot(self) -> VirtualAddress {
        VirtualAddress::new(self.0.as_u32() - DESCRIPTOR_SIZE)
    }

    /// `size` half of the leading descriptor.
    #[inline]
    pub const fn size_slot(self) -> VirtualAddress {
        VirtualAddress::new(self.0.as_u32() - DESCRIPTOR_SIZE / 2)
    }

    /// Free-list link to the previous node.
    #[inline]
    pub const fn prev_link(self) -> VirtualAddress {
        self.0
    }

    /// Free-list link to the next node.
    #[inline]
    pub const fn next_link(self) -> VirtualAddress {
        VirtualAddress::new(self.0.as_u32() + 4)
    }

    /// The chunk behind this one, given this chunk's size. Its leading
    /// descriptor is this chunk's trailing one.
    #[inline]
    pub const fn successor(self, size: u32) -> Self {
        Self(VirtualAddress::new(self.0.as_u32() + size + DESCRIPTOR_SIZE))
    }

    /// The chunk before this one, given the predecessor's size.
    #[inline]
    pub const fn predecessor(self, size_prev: u32) -> Self {
        Self(VirtualAddress::new(self.0.as_u32() - size_prev - DESCRIPTOR_SIZE))
    }

    /// Encode an optional chunk as a free-list link word.
    #[inline]
    pub const fn link(chunk: Option<Self>) -> u32 {
        match chunk {
            Some(c) => c.0.as_u32(),
            None => 0,
        }
    }

    /// Decode a free-list link word.
    #[inline]
    pub const fn from_link(word: u32) -> Option<Self> {
        if word == 0 {
            None
        } else {
            Some(Self(VirtualAddress::new(word)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_keeps_flag_out_of_size() {
        let t = Tag::unused(24);
        assert_eq!(t.into_bits(), 25);
        assert_eq!(t.size(), 24);
        assert!(t.free());
        assert_eq!(Tag::from_bits(0x1F).size(), 0x18);
        assert!(!Tag::used(4096).free());
        assert_eq!(Tag::END.into_bits(), 0);
    }

    #[test]
    fn neighbours_share_a_descriptor() {
        let c = Chunk::at(VirtualAddress::new(0xD000_0010));
        let next = c.successor(24);
        assert_eq!(next.vma(), VirtualAddress::new(0xD000_0030));
        assert_eq!(next.size_prev_slot(), VirtualAddress::new(0xD000_0028));
        assert_eq!(next.predecessor(24), c);
        assert_eq!(c.size_slot(), VirtualAddress::new(0xD000_000C));
    }

    #[test]
    fn null_link_is_none() {
        assert_eq!(Chunk::from_link(0), None);
        let c = Chunk::at(VirtualAddress::new(0xD000_0008));
        assert_eq!(Chunk::from_link(Chunk::link(Some(c))), Some(c));
    }
}
