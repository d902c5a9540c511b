//! # Memory Layout

/// Size of a page and of a page table, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Entries per page directory and per page table.
pub const PAGE_ENTRIES: usize = 1024;

/// Bytes mapped by one page directory entry.
pub const DIRECTORY_SPAN: u32 = PAGE_SIZE * PAGE_ENTRIES as u32;

/// Where the kernel executes (VMA). Everything above is kernel-owned.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// Where the kernel image is placed in *physical* memory (LMA).
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// First page directory index owned by the kernel.
pub const KERNEL_DIRECTORY_INDEX: usize = (KERNEL_BASE / DIRECTORY_SPAN) as usize;

/// Initial stack pointer of a freshly registered process. The stack page
/// itself sits right below.
pub const USER_STACK_TOP: u32 = KERNEL_BASE;

/// Start of the kernel chunk heap.
pub const KERNEL_HEAP_BASE: u32 = 0xD000_0000;

/// Start of the heap that holds free-frame list nodes.
pub const FRAME_LIST_HEAP_BASE: u32 = 0xE000_0000;

/// Directory index that points back at the directory itself.
pub const RECURSIVE_INDEX: usize = PAGE_ENTRIES - 1;

/// Through the recursive slot, page table `i` is visible at
/// `PAGE_TABLE_WINDOW + i * PAGE_SIZE`.
pub const PAGE_TABLE_WINDOW: u32 = RECURSIVE_INDEX as u32 * DIRECTORY_SPAN;

/// The page directory as seen through the recursive slot.
pub const PAGE_DIRECTORY_VMA: u32 = PAGE_TABLE_WINDOW + RECURSIVE_INDEX as u32 * PAGE_SIZE;

/// Upper bound for the process table; PIDs are `0..PID_MAX`.
pub const PID_MAX: usize = 1 << 16;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(KERNEL_BASE.is_multiple_of(DIRECTORY_SPAN));
    assert!(KERNEL_DIRECTORY_INDEX == 768);
    assert!(USER_STACK_TOP <= KERNEL_BASE);
    assert!(KERNEL_HEAP_BASE > KERNEL_BASE);
    assert!(FRAME_LIST_HEAP_BASE > KERNEL_HEAP_BASE);
    assert!(PAGE_TABLE_WINDOW > FRAME_LIST_HEAP_BASE);
    assert!(PAGE_DIRECTORY_VMA == 0xFFFF_F000);
};
