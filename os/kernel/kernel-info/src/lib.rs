//! # Kernel Configuration and Boot Interface
//!
//! The authoritative source for the i386 kernel's memory layout, the segment
//! selectors handed to user processes, and the record the bootstrap passes to
//! the memory core once paging is enabled.
//!
//! ## Memory Layout ([`memory`])
//!
//! ```text
//! Virtual Address Space Layout (32-bit, one shared page directory):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐  dir 0..767
//!             │   User Space                    │  per-process page tables,
//!             │                                 │  swapped on every switch
//! 0xBFFF_F000 ├─────────────────────────────────┤  dir 767
//!             │   User Stack Page               │
//! KERNEL_BASE ├─────────────────────────────────┤  0xC000_0000, dir 768
//!             │   Kernel Text & Data            │
//! KERNEL_HEAP ├─────────────────────────────────┤  0xD000_0000
//!             │   Kernel Chunk Heap             │  grows upwards
//! FRAME_HEAP  ├─────────────────────────────────┤  0xE000_0000
//!             │   Free-Frame List Heap          │
//! TABLE_WINDOW├─────────────────────────────────┤  0xFFC0_0000, dir 1023
//!             │   Page Tables (recursive slot)  │
//! 0xFFFF_F000 │   Page Directory                │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Everything at or above [`KERNEL_BASE`](memory::KERNEL_BASE) is shared by
//! all processes. The scheduler never touches those directory indices.
//!
//! ## Boot Handoff ([`boot`])
//!
//! The bootstrap identity-maps itself, maps the kernel image at
//! [`KERNEL_BASE`](memory::KERNEL_BASE), installs the recursive directory
//! slot, enables paging and then hands a [`BootHandoff`](boot::BootHandoff)
//! to the memory core. Validate it with
//! [`BootHandoff::validate`](boot::BootHandoff::validate) before trusting it.
//!
//! ## Segment Selectors ([`segments`])
//!
//! The GDT itself lives elsewhere; the process table only needs the selector
//! values for user privilege code and data.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod segments;
