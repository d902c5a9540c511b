use crate::Pid;
use kernel_alloc::HeapError;
use kernel_vmem::{DirectoryIndex, PagingError};

/// Failures of the process table and the scheduler.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// Every slot of the process table holds a live process.
    #[error("all {capacity} process IDs are in use")]
    PidSpaceExhausted { capacity: usize },
    /// No live process has this ID.
    #[error("no process with {0}")]
    UnknownPid(Pid),
    /// A process mapping would land on a directory index used by the kernel.
    #[error("{0} is owned by kernel mappings")]
    KernelIndexCollision(DirectoryIndex),
    /// A time slice of zero ticks would never expire.
    #[error("priority must be at least 1")]
    InvalidPriority,
    #[error(transparent)]
    Memory(#[from] HeapError),
}

impl From<PagingError> for ProcessError {
    fn from(value: PagingError) -> Self {
        Self::Memory(value.into())
    }
}
