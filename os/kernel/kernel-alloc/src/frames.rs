//! # Physical Page Pool
//!
//! Frames are handed out from two sources, in this order:
//!
//! 1. A LIFO list of frames given back earlier. Each list node is an 8-byte
//!    chunk of the [`Arena::FrameList`] heap holding `{ pma, next }`.
//! 2. The *break*: the next never-used frame between the boot watermark and
//!    the end of RAM.
//!
//! Frames are zeroed by whoever releases them, not on the way out.

use crate::heap::Arena;
use crate::{HeapError, KernelMemory};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{Mmu, OutOfMemory, PagePool};
use log::{trace, warn};

/// Bookkeeping of the page pool; the list nodes themselves live in the heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FramePool {
    head: Option<VirtualAddress>,
    listed: usize,
    brk: PhysicalAddress,
    limit: PhysicalAddress,
}

impl FramePool {
    /// A pool with an empty list whose break starts at `watermark` (rounded
    /// up to a page) and stops at `limit`.
    pub(crate) const fn new(watermark: PhysicalAddress, limit: PhysicalAddress) -> Self {
        Self {
            head: None,
            listed: 0,
            brk: PhysicalAddress::new(kernel_vmem::align_up(watermark.as_u32(), PAGE_SIZE)),
            limit,
        }
    }

    /// The next frame the break would hand out.
    #[inline]
    #[must_use]
    pub const fn break_address(&self) -> PhysicalAddress {
        self.brk
    }

    /// End of the memory the pool may hand out.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> PhysicalAddress {
        self.limit
    }

    fn bump(&mut self) -> Result<PhysicalAddress, OutOfMemory> {
        let next = self
            .brk
            .checked_add(PAGE_SIZE)
            .filter(|n| n.as_u32() <= self.limit.as_u32())
            .ok_or(OutOfMemory)?;
        let frame = self.brk;
        self.brk = next;
        Ok(frame)
    }
}

impl<M: Mmu> KernelMemory<M> {
    /// One free frame: the most recently released one, else the break.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the list is empty and the break has
    /// reached the end of memory.
    pub fn new_page(&mut self) -> Result<PhysicalAddress, HeapError> {
        let Some(node) = self.frames.head else {
            let frame = self.frames.bump()?;
            trace!("new page {frame} from break");
            return Ok(frame);
        };

        let frame = PhysicalAddress::new(self.space.read_word(node));
        let next = self.space.read_word(node + 4);
        self.frames.head = (next != 0).then_some(VirtualAddress::new(next));
        self.frames.listed -= 1;

        // The pool is consistent again; the node may go back to its arena.
        if let Err(e) = self.free(Arena::FrameList, node) {
            warn!("leaking frame-list node {node}: {e}");
        }
        trace!("new page {frame} from free list");
        Ok(frame)
    }

    /// Put `frame` on the free list.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if no list node can be allocated.
    pub fn release_frame(&mut self, frame: PhysicalAddress) -> Result<(), HeapError> {
        let node = self.alloc(Arena::FrameList, None, crate::MIN_ALLOC_SIZE, 8)?;
        self.space.write_word(node, frame.as_u32());
        self.space
            .write_word(node + 4, self.frames.head.map_or(0, VirtualAddress::as_u32));
        self.frames.head = Some(node);
        self.frames.listed += 1;
        Ok(())
    }

    /// Soft-unmap `vma` and give its frame back to the pool. Returns the
    /// frame.
    ///
    /// # Errors
    /// Page-table errors if no table covers `vma`, or
    /// [`HeapError::OutOfMemory`] if no list node can be allocated. In the
    /// latter case the mapping is restored.
    pub fn free_page(&mut self, vma: VirtualAddress) -> Result<PhysicalAddress, HeapError> {
        let entry = self.space.get_entry(vma)?;
        let frame = entry.frame();
        self.space.unmap(vma)?;

        if let Err(e) = self.release_frame(frame) {
            // A nested allocation may have reused the slot meanwhile.
            if !self.space.is_present(vma)? {
                self.space.set_entry(vma, entry)?;
            }
            return Err(e);
        }
        trace!("freed page {vma} ({frame})");
        Ok(frame)
    }

    /// Frames available: listed ones plus those left above the break.
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        let untouched = (self.frames.limit.as_u32() - self.frames.brk.as_u32()) / PAGE_SIZE;
        self.frames.listed + untouched as usize
    }

    /// Frames on the free list.
    #[must_use]
    pub const fn listed_frames(&self) -> usize {
        self.frames.listed
    }

    #[must_use]
    pub const fn frame_pool(&self) -> &FramePool {
        &self.frames
    }
}

impl<M: Mmu> PagePool for KernelMemory<M> {
    fn new_page(&mut self) -> Result<PhysicalAddress, OutOfMemory> {
        Self::new_page(self).map_err(|e| {
            warn!("page pool: {e}");
            OutOfMemory
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::PageEntryBits;
    use kernel_vmem::sim::{SimulatedBoot, SimulatedMachine};

    fn memory() -> KernelMemory<SimulatedMachine> {
        let (machine, handoff) = SimulatedBoot::default().build();
        KernelMemory::new(machine, &handoff).unwrap()
    }

    #[test]
    fn bump_stops_at_limit() {
        let mut pool = FramePool::new(PhysicalAddress::new(0x1800), PhysicalAddress::new(0x4000));
        assert_eq!(pool.break_address(), PhysicalAddress::new(0x2000));
        assert_eq!(pool.bump(), Ok(PhysicalAddress::new(0x2000)));
        assert_eq!(pool.bump(), Ok(PhysicalAddress::new(0x3000)));
        assert_eq!(pool.bump(), Err(OutOfMemory));
        assert_eq!(pool.break_address(), PhysicalAddress::new(0x4000));
    }

    #[test]
    fn released_frames_come_back_lifo() {
        let mut m = memory();
        let a = m.new_page().unwrap();
        let b = m.new_page().unwrap();
        assert_eq!(b, a + PAGE_SIZE);

        m.release_frame(a).unwrap();
        m.release_frame(b).unwrap();
        assert_eq!(m.listed_frames(), 2);

        assert_eq!(m.new_page().unwrap(), b);
        assert_eq!(m.new_page().unwrap(), a);
        assert_eq!(m.listed_frames(), 0);
        assert!(m.heap(Arena::FrameList).free_list_head().is_some());
    }

    #[test]
    fn free_page_unmaps_softly() {
        let mut m = memory();
        let va = VirtualAddress::new(0x0804_8000);
        let frame = m.new_page().unwrap();
        m.map(va, frame, PageEntryBits::user_rw()).unwrap();

        let before = m.free_frames();
        assert_eq!(m.free_page(va).unwrap(), frame);
        assert_eq!(m.free_frames(), before + 1);

        let entry = m.space().get_entry(va).unwrap();
        assert!(!entry.present());
        assert_eq!(entry.frame(), frame);
        assert!(entry.user());
    }

    #[test]
    fn exhausted_pool_reports_out_of_memory() {
        let (machine, handoff) = SimulatedBoot::default().build();
        let mut m = KernelMemory::new(machine, &handoff).unwrap();
        let free = m.free_frames();
        for _ in 0..free {
            m.new_page().unwrap();
        }
        assert_eq!(m.free_frames(), 0);
        assert!(matches!(m.new_page(), Err(HeapError::OutOfMemory(_))));
        assert_eq!(PagePool::new_page(&mut m), Err(OutOfMemory));
    }
}
