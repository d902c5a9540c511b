use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// A 32-bit page directory or page table entry.
///
/// The layout is the hardware one and must stay bit-exact: the CPU walks
/// these entries directly.
///
/// - Physical frame (bits **31:12**), 4 KiB aligned.
/// - Flags (bits **11:0**). Some bits mean different things at the two
///   levels (bit 7 is PS in a directory entry and PAT in a table entry,
///   `dirty` and `global` only matter in table entries).
///
/// Reference: Intel SDM Vol. 3A, 4.3 "32-Bit Paging".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// **Present** (bit 0): valid entry if set.
    ///
    /// When clear, the CPU ignores every other bit and raises #PF on access.
    pub present: bool,

    /// **Writable** (bit 1): write permission.
    pub writable: bool,

    /// **User/Supervisor** (bit 2): accessible from CPL 3 if set.
    pub user: bool,

    /// **Page Write-Through** (PWT, bit 3).
    pub write_through: bool,

    /// **Page Cache Disable** (PCD, bit 4).
    pub cache_disable: bool,

    /// **Accessed** (bit 5): set by the CPU on first access.
    pub accessed: bool,

    /// **Dirty** (bit 6): set by the CPU on first write (table entries only).
    pub dirty: bool,

    /// **Page Size / PAT** (bit 7): 4 MiB page in a directory entry, PAT
    /// index bit in a table entry.
    pub page_size: bool,

    /// **Global** (bit 8): survives CR3 reloads if CR4.PGE is set.
    pub global: bool,

    /// **OS-available** (bits 9..11): ignored by hardware.
    #[bits(3)]
    pub os_available: u8,

    /// **Physical frame number** (bits 12..31).
    #[bits(20)]
    frame_4k: u32,
}

impl PageEntryBits {
    /// Bits that hold flags rather than the frame.
    pub const FLAGS_MASK: u32 = 0xFFF;

    /// `present | writable`: what the kernel uses for its own pages and for
    /// lazily created page tables.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// `present | writable | user`: process-private pages and tables.
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user(true)
    }

    /// Entry pointing at `frame` (low 12 bits ignored) with the flags of `flags`.
    #[must_use]
    pub const fn from_frame(frame: PhysicalAddress, flags: Self) -> Self {
        Self::from_bits((frame.as_u32() & !Self::FLAGS_MASK) | (flags.into_bits() & Self::FLAGS_MASK))
    }

    /// The mapped frame.
    #[must_use]
    pub const fn frame(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_4k() << 12)
    }

    /// Only the flag bits; frame cleared.
    #[must_use]
    pub const fn flags(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAGS_MASK)
    }

    /// Same frame, flags replaced by those of `flags`.
    #[must_use]
    pub const fn with_flags_of(self, flags: Self) -> Self {
        Self::from_frame(self.frame(), flags)
    }

    /// Same flags, different frame.
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalAddress) -> Self {
        Self::from_frame(frame, self)
    }

    /// An entry that is all zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.into_bits() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_hardware() {
        assert_eq!(PageEntryBits::new().with_present(true).into_bits(), 1 << 0);
        assert_eq!(PageEntryBits::new().with_writable(true).into_bits(), 1 << 1);
        assert_eq!(PageEntryBits::new().with_user(true).into_bits(), 1 << 2);
        assert_eq!(PageEntryBits::new().with_write_through(true).into_bits(), 1 << 3);
        assert_eq!(PageEntryBits::new().with_cache_disable(true).into_bits(), 1 << 4);
        assert_eq!(PageEntryBits::new().with_accessed(true).into_bits(), 1 << 5);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 1 << 6);
        assert_eq!(PageEntryBits::new().with_page_size(true).into_bits(), 1 << 7);
        assert_eq!(PageEntryBits::new().with_global(true).into_bits(), 1 << 8);
        assert_eq!(PageEntryBits::user_rw().into_bits(), 0b111);
    }

    #[test]
    fn frame_and_flags_stay_apart() {
        let e = PageEntryBits::from_frame(PhysicalAddress::new(0x0040_2FFF), PageEntryBits::kernel_rw());
        assert_eq!(e.into_bits(), 0x0040_2003);
        assert_eq!(e.frame(), PhysicalAddress::new(0x0040_2000));
        assert_eq!(e.flags(), PageEntryBits::kernel_rw());

        let moved = e.with_frame(PhysicalAddress::new(0x0010_0000));
        assert_eq!(moved.into_bits(), 0x0010_0003);

        let ro = e.with_flags_of(PageEntryBits::new().with_present(true));
        assert_eq!(ro.into_bits(), 0x0040_2001);
    }
}
