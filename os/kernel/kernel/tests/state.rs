use kernel::{KernelError, KernelState};
use kernel_alloc::{Arena, HeapError};
use kernel_info::boot::{BootHandoff, HandoffError};
use kernel_info::memory::{KERNEL_DIRECTORY_INDEX, PAGE_SIZE, RECURSIVE_INDEX, USER_STACK_TOP};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_proc::{Pid, ProcessError, SavedContext};
use kernel_sync::{InterruptControl, SoftInterrupts};
use kernel_vmem::DirectoryIndex;
use kernel_vmem::sim::{SimulatedBoot, SimulatedMachine};
use std::cell::Cell;

fn boot() -> KernelState<SimulatedMachine> {
    let (machine, handoff) = SimulatedBoot::default().build();
    KernelState::boot(machine, &handoff, 16).unwrap()
}

#[test]
fn boot_shares_every_kernel_table() {
    let k = boot();
    let space = k.memory().space();
    for i in KERNEL_DIRECTORY_INDEX..RECURSIVE_INDEX {
        assert!(space.directory_entry(DirectoryIndex::new(i)).present(), "index {i}");
    }
    assert_eq!(k.scheduler().current_pid(), Pid::KERNEL);
    assert!(!k.has_processes());
    k.memory().check_heap(Arena::Kernel).unwrap();
}

#[test]
fn boot_rejects_a_broken_handoff() {
    let (machine, good) = SimulatedBoot::default().build();
    let bad = BootHandoff::new(
        good.page_directory(),
        PhysicalAddress::new(good.free_watermark().as_u32() + 1),
        good.memory_end(),
        good.kernel_image_end(),
    );
    assert!(matches!(
        KernelState::boot(machine, &bad, 16),
        Err(KernelError::Handoff(HandoffError::UnalignedWatermark(_)))
    ));
}

#[test]
fn boot_without_enough_memory_fails_cleanly() {
    // Room for the heap arenas but not for 255 kernel page tables.
    let boot = SimulatedBoot::default();
    let end = boot.directory().as_u32() + 2 * PAGE_SIZE + 32 * PAGE_SIZE;
    let (machine, handoff) = boot.memory_end(end).build();
    assert!(matches!(
        KernelState::boot(machine, &handoff, 16),
        Err(KernelError::Memory(HeapError::OutOfMemory(_)))
    ));
}

#[test]
fn tick_swaps_register_images_and_acknowledges() {
    let mut k = boot();
    let a = k.spawn(VirtualAddress::new(0x0040_0000), 2).unwrap();
    let b = k.spawn(VirtualAddress::new(0x0050_0000), 2).unwrap();
    assert!(k.has_processes());

    let irq = SoftInterrupts::default();
    let acks = Cell::new(0);
    let eoi = || acks.set(acks.get() + 1);

    // Kernel slice is one tick: the first tick hands over to `a`.
    let mut ctx = SavedContext::default().with_eax(7);
    assert_eq!(k.tick(&irq, &mut ctx, eoi).unwrap(), Some(a));
    assert_eq!(ctx.eip(), 0x0040_0000);
    assert_eq!(ctx.esp(), USER_STACK_TOP);

    // `a` runs for a while and is interrupted with some state.
    ctx.set_eax(0xAAAA);
    assert_eq!(k.tick(&irq, &mut ctx, eoi).unwrap(), None);
    assert_eq!(ctx.eax(), 0xAAAA);
    ctx.set_eax(0xAAAB);
    assert_eq!(k.tick(&irq, &mut ctx, eoi).unwrap(), Some(b));
    assert_eq!(ctx.eip(), 0x0050_0000);

    // Two ticks of `b`, then ten of the kernel, then `a` resumes.
    let mut last = None;
    for _ in 0..12 {
        if let Some(pid) = k.tick(&irq, &mut ctx, eoi).unwrap() {
            last = Some(pid);
        }
    }
    assert_eq!(last, Some(a));
    assert_eq!(ctx.eax(), 0xAAAB);
    assert_eq!(ctx.eip(), 0x0040_0000);

    assert_eq!(acks.get(), 15);
    assert!(irq.enabled());
}

#[test]
fn kernel_context_survives_a_round_trip() {
    let mut k = boot();
    k.spawn(VirtualAddress::new(0x0040_0000), 1).unwrap();
    let irq = SoftInterrupts::default();

    let kernel_ctx = SavedContext::default().with_eip(0xC010_2000).with_cs(0x08);
    let mut ctx = kernel_ctx;
    k.tick(&irq, &mut ctx, || {}).unwrap();
    assert_ne!(ctx, kernel_ctx);
    k.tick(&irq, &mut ctx, || {}).unwrap();
    assert_eq!(k.scheduler().current_pid(), Pid::KERNEL);
    assert_eq!(ctx, kernel_ctx);
}

#[test]
fn spawn_reports_process_errors() {
    let mut k = boot();
    assert_eq!(
        k.spawn(VirtualAddress::new(0x0040_0000), 0),
        Err(KernelError::Process(ProcessError::InvalidPriority))
    );
}
