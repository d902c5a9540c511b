//! # Kernel Memory: Page Pool and Chunk Heap
//!
//! The physical page pool and the boundary-tag chunk heap, composed with the
//! page table layer from `kernel-vmem` into one [`KernelMemory`] value.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Chunk Heap (per arena)             │
//! │    • kmalloc / kmalloc_aligned / kalloc / kfree     │
//! │    • boundary tags, intrusive free list             │
//! │    • grows and shrinks at its end                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ new_page / free_page
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Page Pool                     │
//! │    • LIFO list of reclaimed frames (frame-list      │
//! │      arena nodes)                                   │
//! │    • break pointer up to the end of RAM             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ map / unmap
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Page Table Layer (kernel_vmem::AddressSpace) │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Both layers live in the same struct because they call each other: the
//! heap needs frames to grow, and the pool keeps its free-frame list in a
//! heap arena of its own ([`Arena::FrameList`]). Every operation takes
//! `&mut self`, so a nested call (a page request that frees a list node, a
//! shrink that pushes frames) simply re-reads the heap context it left in a
//! consistent state.
//!
//! ## Chunk layout
//!
//! ```text
//!          ┌ descriptor ┐            ┌ descriptor ┐
//!   ... ───┼─────┬──────┼────────────┼─────┬──────┼─── ...
//!          │prev │ size │ user data  │prev │ size │
//!          └─────┴──────┴────────────┴─────┴──────┘
//!                       ^ vma        ^ vma + size
//! ```
//!
//! A descriptor is two 32-bit tags (`size_prev`, `size`). Sizes are
//! multiples of 8, so bit 0 carries the *free* flag. The last descriptor of a
//! heap has `size == 0` and sits directly below `end`. A free chunk stores
//! its free-list links (`prev`, `next`) in its first 8 bytes.
//!
//! ## Locking
//!
//! None of this is reentrant across interrupts. The kernel keeps the whole
//! [`KernelMemory`] behind one `kernel_sync::SpinLock` taken with interrupts
//! disabled, and holds it across the page-table and page-pool calls nested in
//! an allocation.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod chunk;
pub mod debug;
mod error;
mod frames;
mod heap;
mod memory;

pub use crate::debug::{ChunkInfo, HeapCorruption, HeapReport};
pub use crate::error::HeapError;
pub use crate::frames::FramePool;
pub use crate::heap::{Arena, Heap};
pub use crate::memory::KernelMemory;

/// Size of a chunk descriptor (two boundary tags).
pub const DESCRIPTOR_SIZE: u32 = 8;

/// Smallest allocation; a free chunk must hold its two free-list links.
pub const MIN_ALLOC_SIZE: u32 = 8;
