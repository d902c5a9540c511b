//! # Non-preemptible sections
//!
//! The kernel runs on a single core, so "no interrupt can observe this" is the
//! only mutual exclusion the memory core needs. [`IrqGuard`] clears the
//! interrupt flag for its lifetime and restores the previous state on drop.

use core::cell::Cell;

/// Access to the CPU interrupt flag.
pub trait InterruptControl {
    /// Whether maskable interrupts are currently delivered.
    fn enabled(&self) -> bool;

    /// Stop delivering maskable interrupts (`cli`).
    fn disable(&self);

    /// Resume delivering maskable interrupts (`sti`).
    fn enable(&self);
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Nesting is fine: an inner guard sees interrupts already disabled and
/// leaves them disabled when it goes away.
///
/// ```
/// use kernel_sync::irq::{InterruptControl, IrqGuard, SoftInterrupts};
///
/// let irq = SoftInterrupts::new(true);
/// {
///     let _g = IrqGuard::new(&irq);
///     assert!(!irq.enabled());
///     {
///         let _inner = IrqGuard::new(&irq);
///     }
///     assert!(!irq.enabled());
/// }
/// assert!(irq.enabled());
/// ```
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    ctl: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new(ctl: &'a I) -> Self {
        let were_enabled = ctl.enabled();
        if were_enabled {
            ctl.disable();
        }
        Self { ctl, were_enabled }
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.ctl.enable();
        }
    }
}

/// Run `f` with interrupts disabled.
#[inline]
pub fn without_interrupts<I, R>(ctl: &I, f: impl FnOnce() -> R) -> R
where
    I: InterruptControl + ?Sized,
{
    let _guard = IrqGuard::new(ctl);
    f()
}

/// The real interrupt flag, through `cli`/`sti` and `pushfd`.
///
/// Only meaningful at CPL0 (or with IOPL 3).
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Interrupts;

#[cfg(target_arch = "x86")]
impl InterruptControl for X86Interrupts {
    #[inline]
    fn enabled(&self) -> bool {
        use kernel_registers::LoadRegister;
        kernel_registers::eflags::Eflags::load().if_interrupt_enable()
    }

    #[inline]
    fn disable(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

/// Software model of the interrupt flag for hosted builds.
///
/// Counts how many times interrupts were switched off so callers can verify
/// that a code path really ran inside a non-preemptible section.
#[derive(Debug)]
pub struct SoftInterrupts {
    enabled: Cell<bool>,
    disables: Cell<u32>,
}

impl SoftInterrupts {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: Cell::new(enabled),
            disables: Cell::new(0),
        }
    }

    /// Number of enabled → disabled transitions so far.
    #[must_use]
    pub fn disable_count(&self) -> u32 {
        self.disables.get()
    }
}

impl Default for SoftInterrupts {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InterruptControl for SoftInterrupts {
    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn disable(&self) {
        if self.enabled.replace(false) {
            self.disables.set(self.disables.get() + 1);
        }
    }

    fn enable(&self) {
        self.enabled.set(true);
    }
}
