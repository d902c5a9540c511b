use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{OutOfMemory, PagingError};

/// Failures of the chunk heap and the page pool.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    /// No physical frame left, or the arena's virtual range is used up.
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
    /// Aligning the heap end would leave a hole too small to be a chunk.
    #[error("alignment gap of {gap} bytes can not hold a free chunk")]
    InvalidAlignmentGap { gap: u32 },
    /// The alignment is not a power of two of at least 8.
    #[error("alignment {0} is not a power of two of at least 8")]
    InvalidAlignment(u32),
    /// The address is not the start of a chunk of this heap.
    #[error("{0} is not a chunk of this heap")]
    InvalidAddress(VirtualAddress),
    /// The chunk's own tag already says "free".
    #[error("chunk {0} is already free")]
    DoubleFree(VirtualAddress),
    #[error(transparent)]
    Paging(PagingError),
}

impl From<PagingError> for HeapError {
    fn from(value: PagingError) -> Self {
        match value {
            PagingError::OutOfMemory(e) => Self::OutOfMemory(e),
            other => Self::Paging(other),
        }
    }
}
