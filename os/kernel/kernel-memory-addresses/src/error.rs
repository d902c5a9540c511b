/// Rejected conversion into a typed address.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressError {
    /// The value does not fit the 32-bit address space.
    #[error("address {0:#x} is outside the 32-bit address space")]
    OutOfRange(u64),
    /// The value is not aligned to the requested page size.
    #[error("address {0:#x} is not page aligned")]
    Unaligned(u32),
}
