use crate::Mmu;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// The MMU of the CPU we are running on.
///
/// Memory accesses are plain volatile loads and stores through the current
/// page directory; faults are real page faults.
pub struct X86Mmu {
    _private: (),
}

impl X86Mmu {
    /// # Safety
    /// - Paging must be enabled and the caller must run at CPL 0.
    /// - At most one `X86Mmu` may exist; it is the only path through which
    ///   the memory core touches page tables and heap memory.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Mmu for X86Mmu {
    #[inline]
    fn read_word(&self, va: VirtualAddress) -> u32 {
        unsafe { core::ptr::read_volatile(va.as_mut_ptr::<u32>()) }
    }

    #[inline]
    fn write_word(&mut self, va: VirtualAddress, value: u32) {
        unsafe { core::ptr::write_volatile(va.as_mut_ptr::<u32>(), value) }
    }

    fn page_directory(&self) -> PhysicalAddress {
        unsafe { Cr3::load_unsafe() }.directory_phys()
    }

    fn load_page_directory(&mut self, directory: PhysicalAddress) {
        unsafe { Cr3::from_directory_phys(directory, false, false).store_unsafe() }
    }

    #[inline]
    fn invalidate_page(&mut self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
        }
    }
}
