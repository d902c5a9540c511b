//! # Virtual Memory Support (i386, two-level paging)
//!
//! The page table layer of the kernel: hardware entry layout, the shared page
//! directory and its lookup table, and the two seams the rest of the memory
//! core plugs into.
//!
//! ## Overview
//!
//! - [`PageEntryBits`]: one 32-bit directory or table entry, bit-exact with
//!   the hardware format (frame in bits 12..31, flags in bits 0..11).
//! - [`DirectoryIndex`] / [`TableIndex`]: the two 10-bit halves of a page
//!   number (`va >> 22` and `(va >> 12) & 0x3FF`).
//! - [`AddressSpace`]: the single page directory plus the lookup table that
//!   maps a directory index to the *virtual* address its page table can be
//!   edited at.
//! - [`Mmu`]: every memory access, CR3 load and TLB invalidation the core
//!   performs goes through this trait. On i386 it is a handful of
//!   instructions ([`X86Mmu`]); on a host it is [`sim::SimulatedMachine`].
//! - [`PagePool`]: anything that can hand out a free physical frame.
//!
//! ## Recursive slot
//!
//! Directory entry [`RECURSIVE_INDEX`](info::RECURSIVE_INDEX) points back at
//! the directory. Through it, the page table for directory index `i` appears
//! at `PAGE_TABLE_WINDOW + i * 4096` as soon as its directory entry is
//! present, which is how [`AddressSpace::map`] reaches a table it has just
//! created. Addresses inside the window are never mapped by hand; every
//! operation rejects them with [`PagingError::InvalidAddress`].
//!
//! ## TLB maintenance
//!
//! Single-entry changes (`unmap`, `delete`, `remap`, `set_flags`) invalidate
//! the affected page themselves. Directory-level changes
//! ([`AddressSpace::install_table`], [`AddressSpace::remove_table`]) leave
//! the flush to the caller, who usually batches many of them and then calls
//! [`AddressSpace::flush_tlb`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod address_space;
mod index;
mod page_entry_bits;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
#[cfg(target_arch = "x86")]
mod x86;

pub use crate::address_space::{AddressSpace, PagingError};
pub use crate::index::{DirectoryIndex, TableIndex};
pub use crate::page_entry_bits::PageEntryBits;
#[cfg(target_arch = "x86")]
pub use crate::x86::X86Mmu;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Physical frames ran out.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("out of physical memory")]
pub struct OutOfMemory;

/// Source of free 4 KiB physical frames.
///
/// Returned frames **must** be 4 KiB aligned and not in use by anyone else.
pub trait PagePool {
    /// Hand out one frame.
    ///
    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    fn new_page(&mut self) -> Result<PhysicalAddress, OutOfMemory>;
}

impl<P: PagePool + ?Sized> PagePool for &mut P {
    fn new_page(&mut self) -> Result<PhysicalAddress, OutOfMemory> {
        (**self).new_page()
    }
}

/// Memory and translation primitives of the CPU the core runs on.
///
/// All addresses given to `read_word`/`write_word` are **virtual** and 4-byte
/// aligned; they are translated by the currently loaded page directory. An
/// access to an address that is not mapped is a page fault.
pub trait Mmu {
    /// Read the 32-bit word at `va`.
    fn read_word(&self, va: VirtualAddress) -> u32;

    /// Write the 32-bit word at `va`.
    fn write_word(&mut self, va: VirtualAddress, value: u32);

    /// Fill the whole 4 KiB page at `page` with `value`.
    fn fill_page(&mut self, page: VirtualAddress, value: u32) {
        debug_assert!(page.is_aligned_to(info::PAGE_SIZE));
        for off in (0..info::PAGE_SIZE).step_by(4) {
            self.write_word(page + off, value);
        }
    }

    /// Physical address of the loaded page directory (CR3).
    fn page_directory(&self) -> PhysicalAddress;

    /// Load a page directory (write CR3). Flushes all non-global
    /// translations as a side effect.
    fn load_page_directory(&mut self, directory: PhysicalAddress);

    /// Drop every cached translation by reloading CR3 with its own value.
    fn flush_tlb(&mut self) {
        let directory = self.page_directory();
        self.load_page_directory(directory);
    }

    /// Drop the cached translation of a single page (`invlpg`).
    fn invalidate_page(&mut self, va: VirtualAddress);
}

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u32`.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// assert_eq!(align_up(23,         8), 24);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}
