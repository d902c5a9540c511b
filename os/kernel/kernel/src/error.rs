use kernel_alloc::HeapError;
use kernel_info::boot::HandoffError;
use kernel_proc::ProcessError;

/// Everything that can go wrong at the kernel boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("rejected boot handoff: {0}")]
    Handoff(#[from] HandoffError),
    #[error("memory: {0}")]
    Memory(#[from] HeapError),
    #[error("process table: {0}")]
    Process(#[from] ProcessError),
    /// The kernel singleton was already set up.
    #[error("kernel state already initialized")]
    AlreadyInitialized,
    /// The kernel singleton was used before boot.
    #[error("kernel state not initialized")]
    NotInitialized,
}
