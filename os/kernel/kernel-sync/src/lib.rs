//! # Kernel synchronization primitives
//!
//! A spin lock for kernel singletons and interrupt-disabled sections for
//! everything a timer tick may race with.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{InterruptControl, IrqGuard, SoftInterrupts, without_interrupts};
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
