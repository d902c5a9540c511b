//! Process table entries.

use crate::SavedContext;
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{DirectoryIndex, PageEntryBits};

/// A process ID, an index into the process table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u16);

impl Pid {
    /// The kernel itself; also the idle process.
    pub const KERNEL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(pid: u16) -> Self {
        Self(pid)
    }

    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID {}", self.0)
    }
}

/// Life cycle of a process table slot.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ProcessState {
    /// Free slot.
    #[default]
    Dead,
    /// Waiting for something other than the CPU. Nothing puts a process
    /// into this state yet.
    Sleeping,
    /// Queued, waiting for its time slice.
    Active,
    /// Owns the CPU and has its page tables installed.
    Running,
}

impl ProcessState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dead => "DEAD",
            Self::Sleeping => "SLEEPING",
            Self::Active => "ACTIVE",
            Self::Running => "RUNNING",
        }
    }
}

/// A page table owned by one process, installed into the shared directory
/// only while that process runs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageTableNode {
    /// Directory slot the table belongs to.
    pub index: DirectoryIndex,
    /// Directory entry to install: table frame plus flags.
    pub entry: PageEntryBits,
    /// Where the kernel can edit the table.
    pub table: VirtualAddress,
}

/// One slot of the process table.
#[derive(Debug, Default, Clone)]
pub struct Process {
    pub(crate) context: SavedContext,
    pub(crate) state: ProcessState,
    pub(crate) tables: Vec<PageTableNode>,
    pub(crate) ppid: u16,
    pub(crate) priority: u16,
    pub(crate) exec_count: u16,
    pub(crate) start_time: u64,
}

impl Process {
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    #[inline]
    #[must_use]
    pub const fn context(&self) -> &SavedContext {
        &self.context
    }

    /// Page tables installed while this process runs.
    #[inline]
    #[must_use]
    pub fn page_tables(&self) -> &[PageTableNode] {
        &self.tables
    }

    /// The process that registered this one.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Pid {
        Pid(self.ppid)
    }

    /// Ticks per time slice.
    #[inline]
    #[must_use]
    pub const fn priority(&self) -> u16 {
        self.priority
    }

    /// Ticks left in the current time slice.
    #[inline]
    #[must_use]
    pub const fn exec_count(&self) -> u16 {
        self.exec_count
    }

    /// Scheduler tick count at registration.
    #[inline]
    #[must_use]
    pub const fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Whether this process owns a table at `index`.
    #[must_use]
    pub fn owns(&self, index: DirectoryIndex) -> bool {
        self.tables.iter().any(|n| n.index == index)
    }
}
