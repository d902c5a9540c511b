//! Saved register image of a process.

use kernel_memory_addresses::VirtualAddress;
use kernel_registers::eflags::Eflags;
use log::debug;
use utils_accessors_derive::Accessors;

/// The machine state pushed on a timer interrupt, in push order: the
/// segment registers and general purpose registers saved by the entry stub,
/// then the frame the CPU pushes itself.
///
/// `esp` and `ss` are only pushed by the CPU on a privilege change, which is
/// always the case for user processes.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Accessors)]
pub struct SavedContext {
    ds: u32,
    es: u32,
    fs: u32,
    gs: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    eip: u32,
    cs: u32,
    eflags: u32,
    esp: u32,
    ss: u32,
}

impl SavedContext {
    /// Initial image of a user process: execution starts at `entry` with
    /// the stack pointer at `stack_top`, interrupts enabled and IOPL 3.
    #[must_use]
    pub fn user(entry: VirtualAddress, stack_top: VirtualAddress, code: u16, data: u16) -> Self {
        let data = u32::from(data);
        Self {
            ds: data,
            es: data,
            fs: data,
            gs: data,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            eip: entry.as_u32(),
            cs: u32::from(code),
            eflags: Eflags::user_initial().into_bits(),
            esp: stack_top.as_u32(),
            ss: data,
        }
    }

    /// Dump every register at debug level.
    pub fn log(&self) {
        debug!("     ss: {:#010x}", self.ss);
        debug!("    esp: {:#010x}", self.esp);
        debug!("  flags: {:#010x}", self.eflags);
        debug!("     cs: {:#010x}", self.cs);
        debug!("    eip: {:#010x}", self.eip);
        debug!("    edi: {:#010x}", self.edi);
        debug!("    esi: {:#010x}", self.esi);
        debug!("    ebp: {:#010x}", self.ebp);
        debug!("    ebx: {:#010x}", self.ebx);
        debug!("    edx: {:#010x}", self.edx);
        debug!("    ecx: {:#010x}", self.ecx);
        debug!("    eax: {:#010x}", self.eax);
        debug!("     gs: {:#010x}", self.gs);
        debug!("     fs: {:#010x}", self.fs);
        debug!("     es: {:#010x}", self.es);
        debug!("     ds: {:#010x}", self.ds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::USER_STACK_TOP;
    use kernel_info::segments::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};

    #[test]
    fn user_image() {
        let ctx = SavedContext::user(
            VirtualAddress::new(0x0040_1000),
            VirtualAddress::new(USER_STACK_TOP),
            USER_CODE_SELECTOR,
            USER_DATA_SELECTOR,
        );
        assert_eq!(ctx.eip(), 0x0040_1000);
        assert_eq!(ctx.esp(), 0xC000_0000);
        assert_eq!(ctx.eflags(), 0x3202);
        assert_eq!(ctx.cs(), 0x23);
        for sel in [ctx.ds(), ctx.es(), ctx.fs(), ctx.gs(), ctx.ss()] {
            assert_eq!(sel, 0x2B);
        }
        assert_eq!(ctx.eax(), 0);
    }

    #[test]
    fn layout_matches_push_order() {
        assert_eq!(core::mem::size_of::<SavedContext>(), 16 * 4);
        assert_eq!(core::mem::offset_of!(SavedContext, eip), 11 * 4);
        assert_eq!(core::mem::offset_of!(SavedContext, ss), 15 * 4);
    }
}
