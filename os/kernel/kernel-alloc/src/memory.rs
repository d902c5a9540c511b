//! The composed kernel memory state.

use crate::chunk::{Chunk, Tag};
use crate::frames::FramePool;
use crate::heap::{Arena, Heap};
use crate::{DESCRIPTOR_SIZE, HeapError, MIN_ALLOC_SIZE};
use core::ops::Range;
use kernel_info::boot::BootHandoff;
use kernel_info::memory::{PAGE_SIZE, PAGE_TABLE_WINDOW, RECURSIVE_INDEX};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, DirectoryIndex, Mmu, PageEntryBits, align_up};
use log::{debug, info};

/// Page table layer, page pool and heap arenas.
pub struct KernelMemory<M: Mmu> {
    pub(crate) space: AddressSpace<M>,
    pub(crate) frames: FramePool,
    pub(crate) heaps: [Heap; Arena::COUNT],
}

impl<M: Mmu> KernelMemory<M> {
    /// Take over the paging state left by the bootstrap and create both heap
    /// arenas.
    ///
    /// # Errors
    /// - [`HeapError::Paging`] if the loaded directory lacks the recursive slot.
    /// - [`HeapError::OutOfMemory`] if not even the first heap pages fit.
    pub fn new(mmu: M, handoff: &BootHandoff) -> Result<Self, HeapError> {
        let space = AddressSpace::adopt(mmu)?;
        let frames = FramePool::new(handoff.free_watermark(), handoff.memory_end());
        let mut memory = Self {
            space,
            frames,
            heaps: [Heap::EMPTY; Arena::COUNT],
        };

        for arena in Arena::ALL {
            memory.heaps[arena.index()] =
                memory.new_heap(arena.base(), arena.limit(), arena.shrinkable())?;
        }

        info!(
            "kernel memory: directory {}, break {}, {} frames free",
            memory.space.directory_pma(),
            memory.frames.break_address(),
            memory.free_frames()
        );
        Ok(memory)
    }

    /// Create a heap context at `start`: the first descriptor is placed at
    /// `start` rounded up to 8 and its page is mapped if it is not yet.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the first page can not be backed.
    pub fn new_heap(
        &mut self,
        start: VirtualAddress,
        limit: VirtualAddress,
        shrinkable: bool,
    ) -> Result<Heap, HeapError> {
        let base = VirtualAddress::new(align_up(start.as_u32(), MIN_ALLOC_SIZE));
        let page = VirtualAddress::new(kernel_vmem::align_down(base.as_u32(), PAGE_SIZE));
        if !self.space.is_present(page)? {
            let frame = self.new_page()?;
            self.map(page, frame, PageEntryBits::kernel_rw())?;
        }

        // First descriptor: no predecessor, no successor.
        let first = Chunk::at(base + DESCRIPTOR_SIZE);
        self.space.write_word(first.size_prev_slot(), 0);
        self.space.write_word(first.size_slot(), Tag::END.into_bits());

        debug!("new heap at {base} (limit {limit})");
        Ok(Heap::new(start, base, limit, shrinkable))
    }

    #[inline]
    pub const fn space(&self) -> &AddressSpace<M> {
        &self.space
    }

    #[inline]
    pub const fn space_mut(&mut self) -> &mut AddressSpace<M> {
        &mut self.space
    }

    /// The heap context of `arena`.
    #[inline]
    #[must_use]
    pub const fn heap(&self, arena: Arena) -> &Heap {
        &self.heaps[arena.index()]
    }

    /// Map `vma → pma`, creating the covering page table from this pool if
    /// needed.
    ///
    /// # Errors
    /// - [`HeapError::OutOfMemory`] if a page table was needed but no frame is left.
    /// - [`HeapError::Paging`] for addresses inside the page-table window or
    ///   in a directory slot reserved for process page tables.
    pub fn map(
        &mut self,
        vma: VirtualAddress,
        pma: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), HeapError> {
        if vma.as_u32() >= PAGE_TABLE_WINDOW {
            return Err(kernel_vmem::PagingError::InvalidAddress(vma).into());
        }
        self.space.check_shared(vma)?;
        let idx = DirectoryIndex::of(vma);
        if self.space.table_vma(idx).is_none() {
            let table = self.new_page()?;
            // Acquiring the frame may have run a nested mapping.
            if self.space.table_vma(idx).is_none() {
                self.space.create_table(idx, table)?;
            } else {
                self.release_frame(table)?;
            }
        }
        self.space.map_existing(vma, pma, flags)?;
        Ok(())
    }

    /// Zero and free every present page in `range`; the bootstrap no longer
    /// needs them. Returns how many pages went back to the pool.
    ///
    /// # Errors
    /// Page-table errors for addresses outside mapped tables, or
    /// [`HeapError::OutOfMemory`] if a free-list node can not be allocated.
    pub fn reclaim_boot_pages(&mut self, range: Range<VirtualAddress>) -> Result<usize, HeapError> {
        let mut reclaimed = 0;
        let mut page = VirtualAddress::new(kernel_vmem::align_down(range.start.as_u32(), PAGE_SIZE));
        while page < range.end {
            if self.space.is_present(page)? {
                self.space.clear_page(page)?;
                self.free_page(page)?;
                reclaimed += 1;
            }
            page += PAGE_SIZE;
        }
        info!("reclaimed {reclaimed} boot pages in {}..{}", range.start, range.end);
        Ok(reclaimed)
    }

    /// Give every directory index in `indices` a page table, so that kernel
    /// mappings made later land in tables every process shares.
    ///
    /// Tables are page-aligned kernel heap chunks. Returns the number of
    /// tables created.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] when frames or heap space run out.
    pub fn preallocate_kernel_tables(&mut self, indices: Range<usize>) -> Result<usize, HeapError> {
        let mut created = 0;
        for i in indices.filter(|&i| i != RECURSIVE_INDEX) {
            let idx = DirectoryIndex::new(i);
            if self.space.directory_entry(idx).present() {
                continue;
            }
            let table = self.kmalloc_page()?;
            self.space.clear_page(table)?;
            let frame = self.space.get_pma(table)?;
            self.space
                .install_table(idx, table, PageEntryBits::from_frame(frame, PageEntryBits::kernel_rw()))?;
            created += 1;
        }
        self.space.flush_tlb();
        debug!("preallocated {created} kernel page tables");
        Ok(created)
    }
}
