//! # Kernel
//!
//! Glue between the bootstrap, the interrupt layer and the memory core.
//!
//! [`KernelState`] owns everything the core needs: the page table layer, the
//! page pool, both heap arenas and the process table. It is built once by
//! [`KernelState::boot`] and then handed by reference to whatever needs it.
//! On i386 it lives in a single [`SpinLock`](kernel_sync::SpinLock) holder
//! (see the `x86` runtime), on a host test it is an ordinary value.
//!
//! ## Boot sequence
//!
//! ```text
//! BootHandoff ──validate──▶ KernelMemory::new ──▶ kernel page tables ──▶ Scheduler::new
//!   (CR3, watermark,          (adopt directory,     (768..1022, shared      (PID 0 running,
//!    RAM end, selectors)       heap arenas)          by every process)       scheduler stack)
//! ```
//!
//! ## Timer tick
//!
//! The interrupt stub saves the interrupted registers and calls
//! [`KernelState::tick`]. The running process's image is stored, the
//! scheduler charges a tick and possibly switches page tables, the image of
//! whoever runs next is written back and the interrupt is acknowledged.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod error;
mod state;
#[cfg(target_arch = "x86")]
pub mod x86;

pub use crate::error::KernelError;
pub use crate::state::KernelState;
