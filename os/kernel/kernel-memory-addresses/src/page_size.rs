use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// A page granularity of 32-bit paging. Only [`Size4K`] and [`Size4M`]
/// exist; the trait is sealed.
pub trait PageSize:
    sealed::Sealed + Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display
{
    /// Bytes per page, a power of two.
    const SIZE: u32;
    /// `SIZE == 1 << SHIFT`.
    const SHIFT: u32;
    /// Short name for diagnostics.
    const NAME: &'static str;
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $shift:literal, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u32 = 1 << $shift;
            const SHIFT: u32 = $shift;
            const NAME: &'static str = $label;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::NAME)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::NAME)
            }
        }
    };
}

page_size!(
    /// 4 KiB, the granularity of a page table entry.
    Size4K, 12, "4K"
);
page_size!(
    /// 4 MiB, the span of one page directory entry.
    Size4M, 22, "4M"
);

const _: () = {
    assert!(Size4K::SIZE == 4096);
    assert!(Size4M::SIZE == 1024 * Size4K::SIZE);
};
