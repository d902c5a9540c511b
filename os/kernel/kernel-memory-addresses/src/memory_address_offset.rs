use crate::{MemoryAddress, PageSize};
use core::fmt;
use core::marker::PhantomData;

/// Byte position inside a page of size `S`, always below `S::SIZE`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddressOffset<S: PageSize> {
    value: u32,
    _size: PhantomData<S>,
}

impl<S: PageSize> MemoryAddressOffset<S> {
    /// Keeps only the low `S::SHIFT` bits of `value`.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            value: value & (S::SIZE - 1),
            _size: PhantomData,
        }
    }

    /// The offset part of `addr`.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self::new(addr.as_u32())
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.value
    }
}

impl<S: PageSize> fmt::Debug for MemoryAddressOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x}/{}", self.value, S::NAME)
    }
}
