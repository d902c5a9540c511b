//! # Boundary-Tag Chunk Heap
//!
//! A first-fit allocator over a virtually contiguous region that grows page
//! by page at its `end`.
//!
//! ## Allocation
//!
//! 1. Round the request up to a multiple of 8 (zero becomes 8).
//! 2. With the default alignment, walk the free list: an exact fit is
//!    unlinked; a chunk with room for the request, a descriptor and at least
//!    one more granule is split, and its remainder takes over the original
//!    list slot.
//! 3. Otherwise extend the heap. An alignment gap becomes a free chunk of its
//!    own; `end` is advanced *before* frames are requested, so any nested
//!    heap activity triggered by the page pool sees the reservation.
//!
//! Requests with a stricter alignment never reuse free chunks.
//!
//! ## Free
//!
//! Merge with a free successor, then with a free predecessor. A surviving
//! chunk that ends at `end` is cut off and its whole pages go back to the
//! page pool; any other chunk is flagged free and pushed to the list front.

use crate::chunk::{Chunk, Tag};
use crate::{DESCRIPTOR_SIZE, HeapError, KernelMemory, MIN_ALLOC_SIZE};
use kernel_info::memory::{FRAME_LIST_HEAP_BASE, KERNEL_HEAP_BASE, PAGE_SIZE, PAGE_TABLE_WINDOW};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{Mmu, OutOfMemory, PageEntryBits, PagePool, align_up};
use log::{trace, warn};

/// The heaps kept by [`KernelMemory`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Arena {
    /// General kernel allocations (`kmalloc`).
    Kernel,
    /// Nodes of the physical free-frame list.
    FrameList,
}

impl Arena {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::Kernel, Self::FrameList];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Where the arena starts.
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        match self {
            Self::Kernel => VirtualAddress::new(KERNEL_HEAP_BASE),
            Self::FrameList => VirtualAddress::new(FRAME_LIST_HEAP_BASE),
        }
    }

    /// First address the arena may not grow into.
    #[must_use]
    pub const fn limit(self) -> VirtualAddress {
        match self {
            Self::Kernel => VirtualAddress::new(FRAME_LIST_HEAP_BASE),
            Self::FrameList => VirtualAddress::new(PAGE_TABLE_WINDOW),
        }
    }

    /// Whether freeing the last chunk returns pages to the pool.
    ///
    /// The frame-list arena keeps its pages: returning one would need a new
    /// list node from the very arena that is shrinking.
    #[must_use]
    pub const fn shrinkable(self) -> bool {
        matches!(self, Self::Kernel)
    }
}

/// Heap context: free list head and the current extent.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Heap {
    free_list: Option<Chunk>,
    start: VirtualAddress,
    base: VirtualAddress,
    end: VirtualAddress,
    limit: VirtualAddress,
    shrinkable: bool,
}

impl Heap {
    pub(crate) const EMPTY: Self = Self::new(
        VirtualAddress::zero(),
        VirtualAddress::zero(),
        VirtualAddress::zero(),
        false,
    );

    /// Context for a heap whose first descriptor sits at `base`.
    pub(crate) const fn new(
        start: VirtualAddress,
        base: VirtualAddress,
        limit: VirtualAddress,
        shrinkable: bool,
    ) -> Self {
        Self {
            free_list: None,
            start,
            base,
            end: VirtualAddress::new(base.as_u32() + DESCRIPTOR_SIZE),
            limit,
            shrinkable,
        }
    }

    /// The address the heap was created at.
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// One past the trailing descriptor.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[must_use]
    pub const fn limit(&self) -> VirtualAddress {
        self.limit
    }

    /// The first chunk's user data (equal to `end` while the heap is empty).
    #[must_use]
    pub const fn first_chunk(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u32() + DESCRIPTOR_SIZE)
    }

    #[must_use]
    pub const fn free_list_head(&self) -> Option<VirtualAddress> {
        match self.free_list {
            Some(c) => Some(c.vma()),
            None => None,
        }
    }

    pub(crate) const fn free_list(&self) -> Option<Chunk> {
        self.free_list
    }
}

impl<M: Mmu> KernelMemory<M> {
    /// Allocate `bytes` from the kernel heap.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] when the heap can not grow.
    pub fn kmalloc(&mut self, bytes: u32) -> Result<VirtualAddress, HeapError> {
        self.alloc(Arena::Kernel, None, MIN_ALLOC_SIZE, bytes)
    }

    /// Allocate `bytes` at an `align`-aligned address of the kernel heap.
    ///
    /// Alignments other than 8 always extend the heap.
    ///
    /// # Errors
    /// - [`HeapError::InvalidAlignment`] for non-power-of-two alignments.
    /// - [`HeapError::InvalidAlignmentGap`] if the heap end is exactly one
    ///   descriptor short of the alignment boundary.
    /// - [`HeapError::OutOfMemory`] when the heap can not grow.
    pub fn kmalloc_aligned(&mut self, bytes: u32, align: u32) -> Result<VirtualAddress, HeapError> {
        self.alloc(Arena::Kernel, None, align, bytes)
    }

    /// Like [`kmalloc_aligned`](Self::kmalloc_aligned), with frames for new
    /// heap pages taken from `source` instead of this pool.
    ///
    /// # Errors
    /// See [`kmalloc_aligned`](Self::kmalloc_aligned).
    pub fn kalloc(
        &mut self,
        source: Option<&mut dyn PagePool>,
        align: u32,
        bytes: u32,
    ) -> Result<VirtualAddress, HeapError> {
        self.alloc(Arena::Kernel, source, align, bytes)
    }

    /// Allocate at the end of the kernel heap, skipping the free list.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] when the heap can not grow.
    pub fn kmalloc_tail(&mut self, bytes: u32) -> Result<VirtualAddress, HeapError> {
        self.extend(Arena::Kernel, None, MIN_ALLOC_SIZE, Self::granular(bytes)?)
    }

    /// One page-aligned, page-sized kernel heap chunk (page tables, stacks).
    ///
    /// If the heap end sits exactly one descriptor below a page boundary,
    /// a small chunk is placed at the end first to widen the gap, and given
    /// back afterwards.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] when the heap can not grow.
    pub fn kmalloc_page(&mut self) -> Result<VirtualAddress, HeapError> {
        match self.kmalloc_aligned(PAGE_SIZE, PAGE_SIZE) {
            Err(HeapError::InvalidAlignmentGap { gap }) => {
                trace!("padding heap end to close a {gap} byte gap");
                let pad = self.kmalloc_tail(MIN_ALLOC_SIZE)?;
                let page = self.kmalloc_aligned(PAGE_SIZE, PAGE_SIZE);
                self.kfree(pad)?;
                page
            }
            other => other,
        }
    }

    /// Return a kernel heap chunk.
    ///
    /// # Errors
    /// [`HeapError::InvalidAddress`] or [`HeapError::DoubleFree`] for
    /// addresses that are not live chunks.
    pub fn kfree(&mut self, vma: VirtualAddress) -> Result<(), HeapError> {
        self.free(Arena::Kernel, vma)
    }

    /// Allocate from any arena.
    ///
    /// # Errors
    /// See [`kmalloc_aligned`](Self::kmalloc_aligned).
    pub fn alloc(
        &mut self,
        arena: Arena,
        source: Option<&mut dyn PagePool>,
        align: u32,
        bytes: u32,
    ) -> Result<VirtualAddress, HeapError> {
        if !align.is_power_of_two() || align < MIN_ALLOC_SIZE {
            return Err(HeapError::InvalidAlignment(align));
        }
        let bytes = Self::granular(bytes)?;

        if align == MIN_ALLOC_SIZE
            && let Some(vma) = self.take_free(arena, bytes)
        {
            trace!("{arena:?}: reused {vma} for {bytes} bytes");
            return Ok(vma);
        }

        let vma = self.extend(arena, source, align, bytes)?;
        trace!("{arena:?}: extended to {vma} for {bytes} bytes");
        Ok(vma)
    }

    /// Return a chunk of any arena.
    ///
    /// # Errors
    /// [`HeapError::InvalidAddress`] or [`HeapError::DoubleFree`] for
    /// addresses that are not live chunks.
    pub fn free(&mut self, arena: Arena, vma: VirtualAddress) -> Result<(), HeapError> {
        let heap = self.heaps[arena.index()];
        if vma < heap.first_chunk() || vma >= heap.end || !vma.is_aligned_to(MIN_ALLOC_SIZE) {
            return Err(HeapError::InvalidAddress(vma));
        }

        let mut chunk = Chunk::at(vma);
        let mut tag = self.tag(chunk.size_slot());
        if tag.free() {
            return Err(HeapError::DoubleFree(vma));
        }
        if tag.size() == 0 || chunk.successor(tag.size()).vma() > heap.end {
            return Err(HeapError::InvalidAddress(vma));
        }

        let next = chunk.successor(tag.size());
        let next_tag = self.tag(next.size_slot());
        if next_tag.free() {
            self.unlink(arena, next);
            tag = Tag::used(tag.size() + next_tag.size() + DESCRIPTOR_SIZE);
            self.set_boundary(chunk, tag);
        }

        let prev_tag = self.tag(chunk.size_prev_slot());
        if prev_tag.free() {
            let prev = chunk.predecessor(prev_tag.size());
            self.unlink(arena, prev);
            tag = Tag::used(prev_tag.size() + tag.size() + DESCRIPTOR_SIZE);
            chunk = prev;
            self.set_boundary(chunk, tag);
        }

        if heap.shrinkable && chunk.successor(tag.size()).vma() == heap.end {
            self.shrink(arena, chunk)
        } else {
            self.set_boundary(chunk, Tag::unused(tag.size()));
            self.push(arena, chunk);
            Ok(())
        }
    }

    /// `bytes` rounded up to the allocation granularity. Sizes that do
    /// not fit the 32-bit address space are out of memory.
    fn granular(bytes: u32) -> Result<u32, HeapError> {
        if bytes == 0 {
            return Ok(MIN_ALLOC_SIZE);
        }
        bytes
            .checked_add(MIN_ALLOC_SIZE - 1)
            .map(|v| v & !(MIN_ALLOC_SIZE - 1))
            .ok_or(HeapError::OutOfMemory(OutOfMemory))
    }

    /// First-fit scan of the free list.
    fn take_free(&mut self, arena: Arena, bytes: u32) -> Option<VirtualAddress> {
        let mut cursor = self.heaps[arena.index()].free_list;
        while let Some(chunk) = cursor {
            let size = self.tag(chunk.size_slot()).size();
            if size == bytes {
                self.unlink(arena, chunk);
                self.set_boundary(chunk, Tag::used(size));
                return Some(chunk.vma());
            }
            if bytes.checked_add(DESCRIPTOR_SIZE).is_some_and(|need| size > need) {
                let rest = chunk.successor(bytes);
                let (prev, next) = self.links(chunk);

                self.set_boundary(rest, Tag::unused(size - bytes - DESCRIPTOR_SIZE));
                self.set_boundary(chunk, Tag::used(bytes));

                // The remainder inherits the list slot.
                self.set_links(rest, prev, next);
                self.relink(arena, prev, next, Some(rest));
                return Some(chunk.vma());
            }
            cursor = self.links(chunk).1;
        }
        None
    }

    fn extend(
        &mut self,
        arena: Arena,
        mut source: Option<&mut dyn PagePool>,
        align: u32,
        bytes: u32,
    ) -> Result<VirtualAddress, HeapError> {
        let heap = self.heaps[arena.index()];
        let old_end = heap.end;

        let aligned = old_end
            .as_u32()
            .checked_add(align - 1)
            .map(|v| v & !(align - 1))
            .ok_or(OutOfMemory)?;
        let gap = aligned - old_end.as_u32();
        if gap != 0 && gap <= DESCRIPTOR_SIZE {
            return Err(HeapError::InvalidAlignmentGap { gap });
        }

        let new_end = bytes
            .checked_add(DESCRIPTOR_SIZE)
            .and_then(|span| aligned.checked_add(span))
            .filter(|&e| e <= heap.limit.as_u32())
            .ok_or(OutOfMemory)?;

        // Reserve first: page requests below may re-enter this arena.
        self.heaps[arena.index()].end = VirtualAddress::new(new_end);

        let first_page = align_up(old_end.as_u32(), PAGE_SIZE);
        let mut page = first_page;
        while page < new_end {
            let va = VirtualAddress::new(page);
            if let Err(e) = self.back_page(va, source.as_deref_mut()) {
                self.heaps[arena.index()].end = old_end;
                self.unwind(first_page, page);
                return Err(e);
            }
            page += PAGE_SIZE;
        }

        if gap != 0 {
            let hole = Chunk::at(old_end);
            self.set_boundary(hole, Tag::unused(gap - DESCRIPTOR_SIZE));
            self.push(arena, hole);
        }

        let chunk = Chunk::at(VirtualAddress::new(aligned));
        self.set_boundary(chunk, Tag::used(bytes));
        self.set_tag(chunk.successor(bytes).size_slot(), Tag::END);
        Ok(chunk.vma())
    }

    fn back_page(&mut self, va: VirtualAddress, source: Option<&mut (dyn PagePool + '_)>) -> Result<(), HeapError> {
        if self.space.is_present(va)? {
            return Ok(());
        }
        let frame = match source {
            Some(pool) => pool.new_page()?,
            None => self.new_page()?,
        };
        self.map(va, frame, PageEntryBits::kernel_rw())
    }

    /// Undo a partial extension: return pages `[from, to)`.
    fn unwind(&mut self, from: u32, to: u32) {
        let mut page = from;
        while page < to {
            let va = VirtualAddress::new(page);
            if let Err(e) = self.free_page(va) {
                warn!("lost heap page {va} while unwinding: {e}");
            }
            page += PAGE_SIZE;
        }
    }

    /// Cut `chunk` (the last one) off the heap and hand its pages back.
    fn shrink(&mut self, arena: Arena, chunk: Chunk) -> Result<(), HeapError> {
        let old_end = self.heaps[arena.index()].end;
        let new_end = chunk.vma();
        self.heaps[arena.index()].end = new_end;
        self.set_tag(chunk.size_slot(), Tag::END);

        let mut released = 0;
        let mut page = align_up(new_end.as_u32(), PAGE_SIZE);
        while page < old_end.as_u32() {
            let va = VirtualAddress::new(page);
            let frame = self.space.get_pma(va)?;
            self.space.unmap(va)?;
            if let Err(e) = self.release_frame(frame) {
                warn!("lost frame {frame} behind {va}: {e}");
            }
            released += 1;
            page += PAGE_SIZE;
        }
        trace!("{arena:?}: shrunk to {new_end}, {released} pages released");
        Ok(())
    }

    #[inline]
    pub(crate) fn tag(&self, slot: VirtualAddress) -> Tag {
        Tag::from_bits(self.space.read_word(slot))
    }

    #[inline]
    fn set_tag(&mut self, slot: VirtualAddress, tag: Tag) {
        self.space.write_word(slot, tag.into_bits());
    }

    /// Write `tag` on both sides of `chunk`.
    fn set_boundary(&mut self, chunk: Chunk, tag: Tag) {
        self.set_tag(chunk.size_slot(), tag);
        self.set_tag(chunk.successor(tag.size()).size_prev_slot(), tag);
    }

    pub(crate) fn links(&self, chunk: Chunk) -> (Option<Chunk>, Option<Chunk>) {
        (
            Chunk::from_link(self.space.read_word(chunk.prev_link())),
            Chunk::from_link(self.space.read_word(chunk.next_link())),
        )
    }

    fn set_links(&mut self, chunk: Chunk, prev: Option<Chunk>, next: Option<Chunk>) {
        self.space.write_word(chunk.prev_link(), Chunk::link(prev));
        self.space.write_word(chunk.next_link(), Chunk::link(next));
    }

    /// Point `prev`'s forward link (or the head) and `next`'s back link at
    /// `target`.
    fn relink(&mut self, arena: Arena, prev: Option<Chunk>, next: Option<Chunk>, target: Option<Chunk>) {
        match prev {
            Some(p) => self.space.write_word(p.next_link(), Chunk::link(target)),
            None => self.heaps[arena.index()].free_list = target,
        }
        if let Some(n) = next {
            self.space.write_word(n.prev_link(), Chunk::link(target));
        }
    }

    fn unlink(&mut self, arena: Arena, chunk: Chunk) {
        let (prev, next) = self.links(chunk);
        match prev {
            Some(p) => self.space.write_word(p.next_link(), Chunk::link(next)),
            None => self.heaps[arena.index()].free_list = next,
        }
        if let Some(n) = next {
            self.space.write_word(n.prev_link(), Chunk::link(prev));
        }
    }

    fn push(&mut self, arena: Arena, chunk: Chunk) {
        let head = self.heaps[arena.index()].free_list;
        self.set_links(chunk, None, head);
        if let Some(h) = head {
            self.space.write_word(h.prev_link(), Chunk::link(Some(chunk)));
        }
        self.heaps[arena.index()].free_list = Some(chunk);
    }
}
