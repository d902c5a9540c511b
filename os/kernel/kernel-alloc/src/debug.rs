//! Heap inspection: walk the chunks of an arena, verify its tags and free
//! list, and log what is there.

use crate::chunk::{Chunk, Tag};
use crate::heap::Arena;
use crate::{DESCRIPTOR_SIZE, KernelMemory};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::Mmu;
use log::debug;

/// One chunk as seen by [`KernelMemory::walk_heap`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChunkInfo {
    pub vma: VirtualAddress,
    pub size: u32,
    pub free: bool,
}

/// Totals produced by [`KernelMemory::check_heap`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeapReport {
    pub chunks: usize,
    pub free_chunks: usize,
    pub used_bytes: u32,
    pub free_bytes: u32,
    pub end: VirtualAddress,
}

/// An inconsistency found by [`KernelMemory::check_heap`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapCorruption {
    /// The two copies of a chunk's tag disagree.
    #[error("chunk {vma}: size tag {size:#x} but successor records {size_prev:#x}")]
    TagMismatch {
        vma: VirtualAddress,
        size: u32,
        size_prev: u32,
    },
    /// A chunk runs past the heap end, or the trailing tag is missing.
    #[error("chunk {0} overruns the heap end")]
    Overrun(VirtualAddress),
    /// A listed chunk is tagged as in use.
    #[error("free list holds chunk {0} which is in use")]
    ListedChunkInUse(VirtualAddress),
    /// A list node's back link does not point at its predecessor.
    #[error("free list link broken at {0}")]
    BrokenLink(VirtualAddress),
    /// The number of listed chunks differs from the number tagged free.
    #[error("{listed} chunks listed, {tagged} tagged free")]
    FreeListMismatch { listed: usize, tagged: usize },
}

impl<M: Mmu> KernelMemory<M> {
    /// Visit every chunk of `arena` in address order.
    ///
    /// Stops early at a chunk whose size runs past the heap end.
    pub fn walk_heap(&self, arena: Arena, mut visit: impl FnMut(ChunkInfo)) {
        let heap = self.heap(arena);
        let mut chunk = Chunk::at(heap.first_chunk());
        while chunk.vma() < heap.end() {
            let tag = self.tag(chunk.size_slot());
            if tag.size() == 0 {
                break;
            }
            visit(ChunkInfo {
                vma: chunk.vma(),
                size: tag.size(),
                free: tag.free(),
            });
            match chunk.vma().checked_add(tag.size() + DESCRIPTOR_SIZE) {
                Some(next) if next <= heap.end() => chunk = Chunk::at(next),
                _ => break,
            }
        }
    }

    /// Verify every boundary tag and the free list of `arena`.
    ///
    /// # Errors
    /// The first [`HeapCorruption`] found.
    pub fn check_heap(&self, arena: Arena) -> Result<HeapReport, HeapCorruption> {
        let heap = self.heap(arena);
        let mut report = HeapReport {
            end: heap.end(),
            ..HeapReport::default()
        };

        let mut chunk = Chunk::at(heap.first_chunk());
        loop {
            let tag = self.tag(chunk.size_slot());
            if tag == Tag::END {
                if chunk.vma() != heap.end() {
                    return Err(HeapCorruption::Overrun(chunk.vma()));
                }
                break;
            }
            let next = chunk.successor(tag.size());
            if next.vma() > heap.end() {
                return Err(HeapCorruption::Overrun(chunk.vma()));
            }
            let trailer = self.tag(next.size_prev_slot());
            if trailer != tag {
                return Err(HeapCorruption::TagMismatch {
                    vma: chunk.vma(),
                    size: tag.into_bits(),
                    size_prev: trailer.into_bits(),
                });
            }

            report.chunks += 1;
            if tag.free() {
                report.free_chunks += 1;
                report.free_bytes += tag.size();
            } else {
                report.used_bytes += tag.size();
            }
            chunk = next;
        }

        let mut listed = 0;
        let mut prev = None;
        let mut cursor = heap.free_list();
        while let Some(node) = cursor {
            if !self.tag(node.size_slot()).free() {
                return Err(HeapCorruption::ListedChunkInUse(node.vma()));
            }
            let (back, forward) = self.links(node);
            if back != prev {
                return Err(HeapCorruption::BrokenLink(node.vma()));
            }
            listed += 1;
            if listed > report.free_chunks {
                break;
            }
            prev = Some(node);
            cursor = forward;
        }

        if listed != report.free_chunks {
            return Err(HeapCorruption::FreeListMismatch {
                listed,
                tagged: report.free_chunks,
            });
        }
        Ok(report)
    }

    /// Log the free list of `arena` at debug level.
    pub fn log_free_list(&self, arena: Arena) {
        let mut cursor = self.heap(arena).free_list();
        let mut n = 0usize;
        debug!("{arena:?} free list:");
        while let Some(node) = cursor {
            let size = self.tag(node.size_slot()).size();
            debug!("  #{n}: {} ({size} bytes)", node.vma());
            cursor = self.links(node).1;
            n += 1;
        }
        if n == 0 {
            debug!("  (empty)");
        }
    }
}
