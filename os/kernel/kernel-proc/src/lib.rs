//! # Process Table and Scheduler
//!
//! Processes share one page directory. Each owns a short list of page tables
//! ([`PageTableNode`]) that the [`Scheduler`] plugs into the directory when
//! the process starts its time slice and pulls out again when the slice
//! ends. Kernel mappings above [`KERNEL_BASE`](kernel_info::memory::KERNEL_BASE)
//! are shared and never touched by a switch.
//!
//! ## Life cycle
//!
//! ```text
//! Dead ──register──▶ Active ◀──slice used up── Running
//!                       └────head of queue────────▲
//! ```
//!
//! There is no way back to `Dead` yet, and nothing puts a process to
//! `Sleeping`.
//!
//! ## Time slices
//!
//! A process with priority `n` runs for `n` consecutive ticks. The kernel
//! itself is PID 0 with priority [`KERNEL_PRIORITY`]; it idles while user
//! processes are queued and is not counted by
//! [`Scheduler::live_processes`].
//!
//! Bookkeeping (the table, node lists and the queue) lives in `alloc`
//! collections; page tables and stacks come from the kernel heap and the
//! page pool in [`kernel_alloc::KernelMemory`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod context;
mod error;
mod process;
mod scheduler;

pub use crate::context::SavedContext;
pub use crate::error::ProcessError;
pub use crate::process::{PageTableNode, Pid, Process, ProcessState};
pub use crate::scheduler::{KERNEL_PRIORITY, Scheduler};
