//! # i386 Runtime
//!
//! The pieces that only exist on the real machine: the kernel singleton, the
//! global allocator backing the process table's collections and the debug
//! port logger.
//!
//! The bootstrap calls [`init`] once with its handoff record. From then on
//! the interrupt layer calls [`on_timer`] for every timer tick and the
//! initial thread parks itself in [`idle`].
//!
//! Chunk heap memory (page tables, stacks) is **not** served by the global
//! allocator; it comes from the kernel heap arenas inside
//! [`KernelMemory`](kernel_alloc::KernelMemory). The global allocator only
//! holds bookkeeping: the process table, the page-table node lists and the
//! scheduling queue.

use crate::{KernelError, KernelState};
use kernel_diag::{DebugPortSink, SinkLogger};
use kernel_info::boot::BootHandoff;
use kernel_proc::SavedContext;
use kernel_sync::{SpinLock, X86Interrupts};
use kernel_vmem::X86Mmu;
use log::{LevelFilter, info, warn};
use talc::{ClaimOnOom, Span, Talc, Talck};

/// Process table slots.
pub const PROCESS_SLOTS: usize = 256;

/// Size of the `.bss` arena behind the global allocator.
const BOOKKEEPING_ARENA_SIZE: usize = 256 * 1024;

#[unsafe(link_section = ".bss.heap")]
static mut BOOKKEEPING_ARENA: [u8; BOOKKEEPING_ARENA_SIZE] = [0; BOOKKEEPING_ARENA_SIZE];

#[global_allocator]
static ALLOCATOR: Talck<spin::Mutex<()>, ClaimOnOom> = Talc::new(unsafe {
    ClaimOnOom::new(Span::from_array(core::ptr::addr_of!(BOOKKEEPING_ARENA).cast_mut()))
})
.lock();

static LOGGER: SinkLogger<DebugPortSink> = SinkLogger::new(DebugPortSink::QEMU, LevelFilter::Debug);

static KERNEL: SpinLock<Option<KernelState<X86Mmu>>> = SpinLock::new(None);

/// Bring up logging and the kernel singleton.
///
/// # Safety
/// - Paging must be on with the directory described by `handoff` loaded.
/// - Must run at CPL 0, before interrupts are enabled.
///
/// # Errors
/// - [`KernelError::AlreadyInitialized`] on a second call.
/// - Anything [`KernelState::boot`] reports.
pub unsafe fn init(handoff: &BootHandoff) -> Result<(), KernelError> {
    if LOGGER.install().is_err() {
        warn!("logger already installed");
    }

    let irq = X86Interrupts;
    let mut kernel = KERNEL.lock_irq(&irq);
    if kernel.is_some() {
        return Err(KernelError::AlreadyInitialized);
    }

    // Safety: the caller guarantees paging at CPL 0; this is the only MMU.
    let mmu = unsafe { X86Mmu::new() };
    *kernel = Some(KernelState::boot(mmu, handoff, PROCESS_SLOTS)?);
    info!("kernel state online");
    Ok(())
}

/// Run `f` on the kernel singleton with interrupts disabled.
///
/// # Errors
/// [`KernelError::NotInitialized`] before [`init`].
pub fn with_kernel<R>(f: impl FnOnce(&mut KernelState<X86Mmu>) -> R) -> Result<R, KernelError> {
    let irq = X86Interrupts;
    let mut kernel = KERNEL.lock_irq(&irq);
    kernel.as_mut().map(f).ok_or(KernelError::NotInitialized)
}

/// Like [`with_kernel`], for closures that fail themselves.
///
/// # Errors
/// [`KernelError::NotInitialized`] before [`init`], otherwise whatever `f`
/// returns.
pub fn try_with_kernel<R>(
    f: impl FnOnce(&mut KernelState<X86Mmu>) -> Result<R, KernelError>,
) -> Result<R, KernelError> {
    with_kernel(f)?
}

/// Timer interrupt entry, called by the interrupt stub with the saved
/// register image and the capability to acknowledge the interrupt.
///
/// Ticks that arrive before [`init`] are only acknowledged.
pub fn on_timer(ctx: &mut SavedContext, eoi: impl FnOnce()) {
    let irq = X86Interrupts;
    // Every other holder of this lock has interrupts disabled, so it is free.
    let mut kernel = KERNEL.lock();
    match kernel.as_mut() {
        Some(state) => {
            // The error was logged; the interrupted process keeps running.
            let _ = state.tick(&irq, ctx, eoi);
        }
        None => eoi(),
    }
}

/// Halt until the next interrupt for as long as user processes exist.
pub fn idle() {
    while with_kernel(|k| k.has_processes()).unwrap_or(false) {
        unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) };
    }
    info!("no processes left");
}
