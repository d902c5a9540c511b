//! # Segment Selectors
//!
//! Selector = `(GDT index << 3) | requested privilege level`.

/// Kernel code, GDT index 1, RPL 0.
pub const KERNEL_CODE_SELECTOR: u16 = selector(1, 0);

/// Kernel data, GDT index 2, RPL 0.
pub const KERNEL_DATA_SELECTOR: u16 = selector(2, 0);

/// User code, GDT index 4, RPL 3.
pub const USER_CODE_SELECTOR: u16 = selector(4, 3);

/// User data, GDT index 5, RPL 3.
pub const USER_DATA_SELECTOR: u16 = selector(5, 3);

#[must_use]
pub const fn selector(index: u16, rpl: u16) -> u16 {
    (index << 3) | (rpl & 0x3)
}

const _: () = {
    assert!(USER_CODE_SELECTOR == 0x23);
    assert!(USER_DATA_SELECTOR == 0x2B);
};
