//! # Typed i386 Registers
//!
//! Register images are plain bitfields and can be built and inspected on any
//! host. Moving them into or out of the CPU is only compiled for
//! `target_arch = "x86"` with the `asm` feature.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "eflags")]
pub mod eflags;

/// Read a privileged register into its typed image.
pub trait LoadRegisterUnsafe {
    /// # Safety
    /// Must run at CPL 0 on an i386 CPU.
    unsafe fn load_unsafe() -> Self;
}

/// Write a typed image into a privileged register.
pub trait StoreRegisterUnsafe {
    /// # Safety
    /// Must run at CPL 0. Writing CR3 switches address spaces: the code
    /// performing the store and its stack must be mapped in the new
    /// directory as well.
    unsafe fn store_unsafe(self);
}

/// Registers any privilege level may read (`pushfd` for EFLAGS).
pub trait LoadRegister {
    fn load() -> Self;
}

impl<T: LoadRegister> LoadRegisterUnsafe for T {
    #[inline]
    unsafe fn load_unsafe() -> Self {
        T::load()
    }
}
