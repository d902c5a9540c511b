use bitfield_struct::bitfield;

/// Architectural EFLAGS model for i386.
///
/// Reserved bits are modeled with fixed defaults so that images built here
/// can be loaded with `iret` as-is.
#[bitfield(u32, order = Lsb)]
pub struct Eflags {
    /// Carry Flag
    pub cf_carry: bool, // 0

    /// Always 1.
    #[bits(default = true)]
    _always1: bool, // 1

    /// Parity Flag
    pub pf_parity: bool, // 2

    #[bits(default = false)]
    _rsvd3: bool, // 3

    /// Adjust Flag
    pub af_adjust: bool, // 4

    #[bits(default = false)]
    _rsvd5: bool, // 5

    /// Zero Flag
    pub zf_zero: bool, // 6

    /// Sign Flag
    pub sf_sign: bool, // 7

    /// Trap Flag
    pub tf_trap: bool, // 8

    /// Interrupt Enable Flag
    pub if_interrupt_enable: bool, // 9

    /// Direction Flag
    pub df_direction: bool, // 10

    /// Overflow Flag
    pub of_overflow: bool, // 11

    /// I/O Privilege Level (2 bits)
    #[bits(2)]
    pub iopl: u8, // 12–13

    /// Nested Task
    pub nt_nested: bool, // 14

    #[bits(default = false)]
    _rsvd15: bool, // 15

    /// Resume Flag
    pub rf_resume: bool, // 16

    /// Virtual 8086 mode
    pub vm_virtual_8086: bool, // 17

    /// Alignment Check
    pub ac_alignment_check: bool, // 18

    /// Virtual Interrupt Flag
    pub vif_virtual_interrupt: bool, // 19

    /// Virtual Interrupt Pending
    pub vip_virtual_interrupt_pending: bool, // 20

    /// ID Flag: allows toggling CPUID.
    pub id_cpuid: bool, // 21

    /// Reserved 22–31 (all zero)
    #[bits(10, default = 0)]
    _reserved_rest: u16,
}

impl Eflags {
    /// Flags a user process starts with: interrupts on, port I/O allowed.
    #[must_use]
    pub const fn user_initial() -> Self {
        Self::new().with_if_interrupt_enable(true).with_iopl(3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegister for Eflags {
    fn load() -> Self {
        let flags: u32;
        unsafe {
            core::arch::asm!("pushfd", "pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        Self::from_bits(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_initial_image() {
        assert_eq!(Eflags::user_initial().into_bits(), 0x3202);
    }

    #[test]
    fn reserved_bit_one_is_set_by_default() {
        assert_eq!(Eflags::new().into_bits(), 0x2);
        assert!(Eflags::from_bits(0x202).if_interrupt_enable());
    }
}
