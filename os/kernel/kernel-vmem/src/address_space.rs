//! # Address Space (i386, single shared page directory)
//!
//! The page table layer. One [`AddressSpace`] owns the MMU handle and the
//! directory-index → table-VMA lookup table and exposes entry-level
//! operations on virtual addresses.
//!
//! ## Lookup table
//!
//! Directory entries hold *physical* table addresses, but editing a table
//! needs a virtual one. `lookup[i]` is that virtual address for directory
//! index `i`, and it is only ever written together with the directory entry
//! itself ([`AddressSpace::install_table`], [`AddressSpace::remove_table`],
//! lazy creation in [`AddressSpace::map`]). Tables created lazily live in the
//! recursive window; tables handed in by callers (kernel preallocation,
//! per-process tables) live wherever the caller allocated them.
//!
//! ## Soft vs. hard unmap
//!
//! - [`unmap`](AddressSpace::unmap) clears only *Present*. The frame number
//!   stays in the entry so it can still be read back with
//!   [`get_pma`](AddressSpace::get_pma).
//! - [`delete`](AddressSpace::delete) zeroes the whole entry.
//!
//! ## Private indices
//!
//! Directory indices handed to processes with
//! [`reserve_private`](AddressSpace::reserve_private) swap tables on every
//! context switch. [`map`](AddressSpace::map) refuses them, so no kernel
//! mapping can end up in a slot that the next switch overwrites.

use crate::info::{PAGE_ENTRIES, PAGE_SIZE, PAGE_TABLE_WINDOW, RECURSIVE_INDEX};
use crate::{DirectoryIndex, Mmu, OutOfMemory, PageEntryBits, PagePool, TableIndex};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use log::{debug, trace};

/// Failures of the page table layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    /// The address lies in the page-table window and can not be mapped or
    /// edited through entry-level operations.
    #[error("virtual address {0} is reserved for page tables")]
    InvalidAddress(VirtualAddress),
    /// No page table covers the address.
    #[error("no page table covers {0}")]
    TableNotPresent(VirtualAddress),
    /// The directory index is the recursive slot.
    #[error("directory index {0} is reserved")]
    ReservedIndex(DirectoryIndex),
    /// The directory index belongs to process page tables.
    #[error("directory index {0} holds process page tables")]
    PrivateIndex(DirectoryIndex),
    /// The loaded directory does not map itself at the recursive slot.
    #[error("page directory at {0} does not map itself at the recursive slot")]
    MissingRecursiveSlot(PhysicalAddress),
    /// A new page table could not be allocated.
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

/// The shared page directory and its lookup table.
pub struct AddressSpace<M: Mmu> {
    mmu: M,
    directory_pma: PhysicalAddress,
    lookup: [Option<VirtualAddress>; PAGE_ENTRIES],
    private: [bool; PAGE_ENTRIES],
}

impl<M: Mmu> AddressSpace<M> {
    /// Take over the directory currently loaded in `mmu`.
    ///
    /// Every present directory entry is registered in the lookup table at its
    /// recursive-window address.
    ///
    /// # Errors
    /// [`PagingError::MissingRecursiveSlot`] if the bootstrap did not install
    /// the self-reference.
    pub fn adopt(mmu: M) -> Result<Self, PagingError> {
        let directory_pma = mmu.page_directory();
        let mut space = Self {
            mmu,
            directory_pma,
            lookup: [None; PAGE_ENTRIES],
            private: [false; PAGE_ENTRIES],
        };

        let slot = space.directory_entry(DirectoryIndex::new(RECURSIVE_INDEX));
        if !slot.present() || slot.frame() != directory_pma {
            return Err(PagingError::MissingRecursiveSlot(directory_pma));
        }

        let mut tables = 0usize;
        for idx in DirectoryIndex::all().filter(|i| i.as_usize() != RECURSIVE_INDEX) {
            if space.directory_entry(idx).present() {
                space.lookup[idx.as_usize()] = Some(Self::window(idx));
                tables += 1;
            }
        }
        debug!("adopted page directory at {directory_pma} with {tables} page tables");
        Ok(space)
    }

    /// Virtual address of the directory itself (through the recursive slot).
    #[inline]
    #[must_use]
    pub const fn directory_vma() -> VirtualAddress {
        Self::window(DirectoryIndex::new(RECURSIVE_INDEX))
    }

    /// Where the table of `idx` shows up through the recursive slot.
    #[inline]
    #[must_use]
    pub const fn window(idx: DirectoryIndex) -> VirtualAddress {
        VirtualAddress::new(PAGE_TABLE_WINDOW + idx.as_usize() as u32 * PAGE_SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn directory_pma(&self) -> PhysicalAddress {
        self.directory_pma
    }

    #[inline]
    pub const fn mmu(&self) -> &M {
        &self.mmu
    }

    #[inline]
    pub const fn mmu_mut(&mut self) -> &mut M {
        &mut self.mmu
    }

    /// Read a word of mapped memory.
    #[inline]
    pub fn read_word(&self, va: VirtualAddress) -> u32 {
        self.mmu.read_word(va)
    }

    /// Write a word of mapped memory.
    #[inline]
    pub fn write_word(&mut self, va: VirtualAddress, value: u32) {
        self.mmu.write_word(va, value);
    }

    /// Load this directory into CR3.
    pub fn activate(&mut self) {
        self.mmu.load_page_directory(self.directory_pma);
    }

    /// Full TLB flush.
    pub fn flush_tlb(&mut self) {
        self.mmu.flush_tlb();
    }

    /// Raw directory entry.
    #[must_use]
    pub fn directory_entry(&self, idx: DirectoryIndex) -> PageEntryBits {
        PageEntryBits::from_bits(
            self.mmu
                .read_word(Self::directory_vma() + idx.byte_offset()),
        )
    }

    fn write_directory_entry(&mut self, idx: DirectoryIndex, entry: PageEntryBits) {
        self.mmu
            .write_word(Self::directory_vma() + idx.byte_offset(), entry.into_bits());
    }

    /// Virtual address of the page table behind `idx`, if any.
    #[inline]
    #[must_use]
    pub const fn table_vma(&self, idx: DirectoryIndex) -> Option<VirtualAddress> {
        self.lookup[idx.as_usize()]
    }

    /// Hand directory index `idx` to process page tables for good.
    ///
    /// # Errors
    /// [`PagingError::ReservedIndex`] for the recursive slot.
    pub fn reserve_private(&mut self, idx: DirectoryIndex) -> Result<(), PagingError> {
        Self::check_index(idx)?;
        if !self.private[idx.as_usize()] {
            debug!("directory index {idx} reserved for process tables");
        }
        self.private[idx.as_usize()] = true;
        Ok(())
    }

    /// True if `idx` was handed to process page tables.
    #[inline]
    #[must_use]
    pub const fn is_private(&self, idx: DirectoryIndex) -> bool {
        self.private[idx.as_usize()]
    }

    /// Fails for addresses whose directory index belongs to processes.
    ///
    /// # Errors
    /// [`PagingError::PrivateIndex`] for such addresses.
    pub const fn check_shared(&self, vma: VirtualAddress) -> Result<(), PagingError> {
        let idx = DirectoryIndex::of(vma);
        if self.private[idx.as_usize()] {
            return Err(PagingError::PrivateIndex(idx));
        }
        Ok(())
    }

    /// Install a page table at directory index `idx`: the directory gets
    /// `entry` (table frame + flags) and the lookup table gets `table_vma`.
    ///
    /// The TLB is left alone; flush once after a batch of changes.
    ///
    /// # Errors
    /// [`PagingError::ReservedIndex`] for the recursive slot.
    pub fn install_table(
        &mut self,
        idx: DirectoryIndex,
        table_vma: VirtualAddress,
        entry: PageEntryBits,
    ) -> Result<(), PagingError> {
        Self::check_index(idx)?;
        self.lookup[idx.as_usize()] = Some(table_vma);
        self.write_directory_entry(idx, entry);
        Ok(())
    }

    /// Clear directory index `idx` and its lookup slot.
    ///
    /// The TLB is left alone; flush once after a batch of changes.
    ///
    /// # Errors
    /// [`PagingError::ReservedIndex`] for the recursive slot.
    pub fn remove_table(&mut self, idx: DirectoryIndex) -> Result<(), PagingError> {
        Self::check_index(idx)?;
        self.lookup[idx.as_usize()] = None;
        self.write_directory_entry(idx, PageEntryBits::new());
        Ok(())
    }

    /// Make a zeroed frame the page table for `idx`, reachable through the
    /// recursive window. Directory flags are `present | writable`.
    ///
    /// # Errors
    /// [`PagingError::ReservedIndex`] for the recursive slot.
    pub fn create_table(
        &mut self,
        idx: DirectoryIndex,
        table: PhysicalAddress,
    ) -> Result<VirtualAddress, PagingError> {
        Self::check_index(idx)?;
        let vma = Self::window(idx);
        self.install_table(idx, vma, PageEntryBits::from_frame(table, PageEntryBits::kernel_rw()))?;
        self.mmu.invalidate_page(vma);
        self.mmu.fill_page(vma, 0);
        trace!("created page table {idx:?} at {table} (window {vma})");
        Ok(vma)
    }

    /// Map `vma → pma` with `flags`, creating the page table from `pool` if
    /// the directory entry is empty.
    ///
    /// # Errors
    /// - [`PagingError::InvalidAddress`] inside the page-table window.
    /// - [`PagingError::PrivateIndex`] where process tables come and go.
    /// - [`PagingError::OutOfMemory`] if a table was needed and `pool` is empty.
    pub fn map<P: PagePool + ?Sized>(
        &mut self,
        vma: VirtualAddress,
        pma: PhysicalAddress,
        flags: PageEntryBits,
        pool: &mut P,
    ) -> Result<(), PagingError> {
        Self::check_address(vma)?;
        self.check_shared(vma)?;
        let idx = DirectoryIndex::of(vma);
        if self.lookup[idx.as_usize()].is_none() {
            let table = pool.new_page()?;
            self.create_table(idx, table)?;
        }
        self.map_existing(vma, pma, flags)
    }

    /// Map `vma → pma` with `flags` into an already present page table.
    ///
    /// # Errors
    /// - [`PagingError::InvalidAddress`] inside the page-table window.
    /// - [`PagingError::TableNotPresent`] if no table covers `vma`.
    pub fn map_existing(
        &mut self,
        vma: VirtualAddress,
        pma: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), PagingError> {
        self.set_entry(vma, PageEntryBits::from_frame(pma, flags))
    }

    /// Overwrite the table entry for `vma`.
    ///
    /// If the previous entry was present its cached translation is dropped.
    ///
    /// # Errors
    /// - [`PagingError::InvalidAddress`] inside the page-table window.
    /// - [`PagingError::TableNotPresent`] if no table covers `vma`.
    pub fn set_entry(&mut self, vma: VirtualAddress, entry: PageEntryBits) -> Result<(), PagingError> {
        let slot = self.entry_slot(vma)?;
        let old = PageEntryBits::from_bits(self.mmu.read_word(slot));
        self.mmu.write_word(slot, entry.into_bits());
        if old.present() {
            self.mmu.invalidate_page(vma);
        }
        Ok(())
    }

    /// The table entry for `vma`.
    ///
    /// # Errors
    /// - [`PagingError::InvalidAddress`] inside the page-table window.
    /// - [`PagingError::TableNotPresent`] if no table covers `vma`.
    pub fn get_entry(&self, vma: VirtualAddress) -> Result<PageEntryBits, PagingError> {
        let slot = self.entry_slot(vma)?;
        Ok(PageEntryBits::from_bits(self.mmu.read_word(slot)))
    }

    /// Frame recorded for `vma`, present or not.
    ///
    /// # Errors
    /// See [`get_entry`](Self::get_entry).
    pub fn get_pma(&self, vma: VirtualAddress) -> Result<PhysicalAddress, PagingError> {
        self.get_entry(vma).map(PageEntryBits::frame)
    }

    /// Flag bits recorded for `vma`.
    ///
    /// # Errors
    /// See [`get_entry`](Self::get_entry).
    pub fn get_flags(&self, vma: VirtualAddress) -> Result<PageEntryBits, PagingError> {
        self.get_entry(vma).map(PageEntryBits::flags)
    }

    /// Whether `vma` is backed by a present entry. A missing page table
    /// means "not present".
    ///
    /// # Errors
    /// [`PagingError::InvalidAddress`] inside the page-table window.
    pub fn is_present(&self, vma: VirtualAddress) -> Result<bool, PagingError> {
        match self.get_entry(vma) {
            Ok(e) => Ok(e.present()),
            Err(PagingError::TableNotPresent(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replace the flags of `vma`, keeping its frame.
    ///
    /// # Errors
    /// See [`get_entry`](Self::get_entry).
    pub fn set_flags(&mut self, vma: VirtualAddress, flags: PageEntryBits) -> Result<(), PagingError> {
        let slot = self.entry_slot(vma)?;
        let old = PageEntryBits::from_bits(self.mmu.read_word(slot));
        self.mmu.write_word(slot, old.with_flags_of(flags).into_bits());
        self.mmu.invalidate_page(vma);
        Ok(())
    }

    /// Soft unmap: clear *Present*, keep frame and other flags.
    ///
    /// # Errors
    /// See [`get_entry`](Self::get_entry).
    pub fn unmap(&mut self, vma: VirtualAddress) -> Result<(), PagingError> {
        let slot = self.entry_slot(vma)?;
        let old = PageEntryBits::from_bits(self.mmu.read_word(slot));
        self.mmu.write_word(slot, old.with_present(false).into_bits());
        self.mmu.invalidate_page(vma);
        Ok(())
    }

    /// Hard unmap: zero the whole entry.
    ///
    /// # Errors
    /// See [`get_entry`](Self::get_entry).
    pub fn delete(&mut self, vma: VirtualAddress) -> Result<(), PagingError> {
        let slot = self.entry_slot(vma)?;
        self.mmu.write_word(slot, 0);
        self.mmu.invalidate_page(vma);
        Ok(())
    }

    /// Point `vma` at a different frame, keeping its flags.
    ///
    /// # Errors
    /// See [`get_entry`](Self::get_entry).
    pub fn remap(&mut self, vma: VirtualAddress, pma: PhysicalAddress) -> Result<(), PagingError> {
        let slot = self.entry_slot(vma)?;
        let old = PageEntryBits::from_bits(self.mmu.read_word(slot));
        self.mmu.write_word(slot, old.with_frame(pma).into_bits());
        self.mmu.invalidate_page(vma);
        Ok(())
    }

    /// Zero the mapped page at `vma`.
    ///
    /// # Errors
    /// - [`PagingError::InvalidAddress`] inside the page-table window.
    /// - [`PagingError::TableNotPresent`] if no table covers `vma`.
    pub fn clear_page(&mut self, vma: VirtualAddress) -> Result<(), PagingError> {
        self.entry_slot(vma)?;
        self.mmu.fill_page(vma.align_down::<Size4K>(), 0);
        Ok(())
    }

    /// Software page walk through the lookup table.
    #[must_use]
    pub fn translate(&self, vma: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.get_entry(vma).ok()?;
        entry
            .present()
            .then(|| entry.frame() + vma.offset::<Size4K>().as_u32())
    }

    fn entry_slot(&self, vma: VirtualAddress) -> Result<VirtualAddress, PagingError> {
        Self::check_address(vma)?;
        let table = self.lookup[DirectoryIndex::of(vma).as_usize()]
            .ok_or(PagingError::TableNotPresent(vma))?;
        Ok(table + TableIndex::of(vma).byte_offset())
    }

    const fn check_address(vma: VirtualAddress) -> Result<(), PagingError> {
        if vma.as_u32() >= PAGE_TABLE_WINDOW {
            return Err(PagingError::InvalidAddress(vma));
        }
        Ok(())
    }

    const fn check_index(idx: DirectoryIndex) -> Result<(), PagingError> {
        if idx.as_usize() == RECURSIVE_INDEX {
            return Err(PagingError::ReservedIndex(idx));
        }
        Ok(())
    }
}
