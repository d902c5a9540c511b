//! # Priority Round-Robin Scheduler
//!
//! The queue holds every runnable PID; its head is the running process. Each
//! timer tick takes one tick off the running process's slice. When the slice
//! is used up the head moves to the tail and the new head takes over.
//!
//! ## Address space switch
//!
//! There is one page directory. A process's private page tables are only
//! present in it while that process runs:
//!
//! ```text
//!  outgoing            directory            incoming
//!  ┌──────────┐        ┌──────────┐        ┌──────────┐
//!  │ idx 767  │──off──▶│   ...    │◀──on───│ idx 767  │
//!  └──────────┘        │ 768..1022│ kernel └──────────┘
//!                      │   1023   │ recursive
//!                      └──────────┘
//! ```
//!
//! Kernel indices (`768..`) are never written here, so kernel mappings look
//! the same to every process. Registration reserves a process's indices in
//! the address space, which keeps kernel mappings out of them, and a switch
//! refuses to install a table over an entry it does not own.

use crate::{Pid, Process, ProcessError, ProcessState, SavedContext, process::PageTableNode};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use kernel_alloc::KernelMemory;
use kernel_info::memory::{KERNEL_DIRECTORY_INDEX, PAGE_SIZE, PID_MAX, USER_STACK_TOP};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{InterruptControl, IrqGuard};
use kernel_vmem::{DirectoryIndex, Mmu, PageEntryBits, TableIndex};
use log::{debug, info, trace, warn};

/// Time slice of the kernel process.
pub const KERNEL_PRIORITY: u16 = 10;

/// Process table and scheduling queue.
pub struct Scheduler {
    table: Vec<Process>,
    queue: VecDeque<Pid>,
    capacity: usize,
    cursor: usize,
    current: Pid,
    live: usize,
    ticks: u64,
    stack_top: VirtualAddress,
    user_code: u16,
    user_data: u16,
}

impl Scheduler {
    /// Set up the process table with room for `capacity` PIDs and make the
    /// running kernel PID 0.
    ///
    /// The kernel gets a one-tick slice so the first timer interrupt hands
    /// the CPU to the first registered process. It stays in the queue but is
    /// not counted by [`live_processes`](Self::live_processes).
    ///
    /// # Errors
    /// [`ProcessError::Memory`] if the scheduler stack page can not be
    /// allocated.
    pub fn new<M: Mmu>(
        memory: &mut KernelMemory<M>,
        capacity: usize,
        user_code: u16,
        user_data: u16,
    ) -> Result<Self, ProcessError> {
        let capacity = capacity.clamp(1, PID_MAX);
        let stack = memory.kmalloc_page()?;

        let mut table = Vec::new();
        table.push(Process {
            state: ProcessState::Running,
            priority: KERNEL_PRIORITY,
            exec_count: 1,
            ..Process::default()
        });
        let mut queue = VecDeque::new();
        queue.push_back(Pid::KERNEL);

        info!("process table: {capacity} slots, scheduler stack at {stack}");
        Ok(Self {
            table,
            queue,
            capacity,
            cursor: 0,
            current: Pid::KERNEL,
            live: 0,
            ticks: 0,
            stack_top: stack + PAGE_SIZE,
            user_code,
            user_data,
        })
    }

    /// Top of the page the CPU switches to when an interrupt arrives in
    /// user mode (the TSS `esp0`).
    #[inline]
    #[must_use]
    pub const fn stack_top(&self) -> VirtualAddress {
        self.stack_top
    }

    #[inline]
    #[must_use]
    pub const fn current_pid(&self) -> Pid {
        self.current
    }

    /// Registered processes, not counting the kernel. The idle loop runs
    /// while this is non-zero.
    #[inline]
    #[must_use]
    pub const fn live_processes(&self) -> usize {
        self.live
    }

    /// Timer ticks seen so far.
    #[inline]
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The table slot of `pid`, if that process is alive.
    #[must_use]
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.table
            .get(pid.as_usize())
            .filter(|p| p.state != ProcessState::Dead)
    }

    /// PIDs in scheduling order, running process first.
    pub fn queue(&self) -> impl Iterator<Item = Pid> + '_ {
        self.queue.iter().copied()
    }

    /// Saved register image of `pid`.
    ///
    /// # Errors
    /// [`ProcessError::UnknownPid`] if no such process is alive.
    pub fn context(&self, pid: Pid) -> Result<&SavedContext, ProcessError> {
        self.process(pid)
            .map(Process::context)
            .ok_or(ProcessError::UnknownPid(pid))
    }

    /// Save the interrupted register image into the running process.
    pub fn store_context(&mut self, ctx: &SavedContext) {
        self.running_mut().context = *ctx;
    }

    /// Register image to resume the running process with.
    #[must_use]
    pub fn load_context(&self) -> SavedContext {
        self.table[self.current.as_usize()].context
    }

    /// Create a process that starts at `entry` and runs `priority` ticks per
    /// turn.
    ///
    /// The process gets one page of stack right below
    /// [`USER_STACK_TOP`], in a page table of its own.
    ///
    /// # Errors
    /// - [`ProcessError::InvalidPriority`] for a priority of zero.
    /// - [`ProcessError::PidSpaceExhausted`] if the table is full.
    /// - [`ProcessError::KernelIndexCollision`] if the stack would live in a
    ///   directory slot used by kernel mappings.
    /// - [`ProcessError::Memory`] when the heap or the page pool runs dry.
    pub fn register<M: Mmu>(
        &mut self,
        memory: &mut KernelMemory<M>,
        entry: VirtualAddress,
        priority: u16,
    ) -> Result<Pid, ProcessError> {
        if priority == 0 {
            return Err(ProcessError::InvalidPriority);
        }

        let stack_top = VirtualAddress::new(USER_STACK_TOP);
        let stack_page = stack_top - PAGE_SIZE;
        let index = DirectoryIndex::of(stack_page);
        self.check_index(memory, index)?;

        let pid = self.new_pid()?;
        let node = Self::stack_table(memory, stack_page)?;
        memory.space_mut().reserve_private(index)?;

        let ppid = self.current.as_u16();
        let start_time = self.ticks;
        let process = &mut self.table[pid.as_usize()];
        *process = Process {
            context: SavedContext::user(entry, stack_top, self.user_code, self.user_data),
            state: ProcessState::Active,
            tables: Vec::new(),
            ppid,
            priority,
            exec_count: priority,
            start_time,
        };
        process.tables.push(node);

        self.queue.push_back(pid);
        self.live += 1;
        info!("registered {pid}: entry {entry}, priority {priority}");
        Ok(pid)
    }

    /// The timer tick: charge the running process one tick and switch to the
    /// next one once its slice is used up.
    ///
    /// Runs with interrupts disabled. Returns the PID that took over, if a
    /// switch happened.
    ///
    /// # Errors
    /// - [`ProcessError::KernelIndexCollision`] if the incoming process's
    ///   slot is taken by a table neither process owns. Nothing is switched
    ///   and the next tick tries again.
    /// - [`ProcessError::Memory`] if a directory slot can not be written.
    pub fn reschedule<M, I>(
        &mut self,
        memory: &mut KernelMemory<M>,
        irq: &I,
    ) -> Result<Option<Pid>, ProcessError>
    where
        M: Mmu,
        I: InterruptControl + ?Sized,
    {
        let _guard = IrqGuard::new(irq);
        self.ticks += 1;

        let running = self.running_mut();
        running.exec_count = running.exec_count.saturating_sub(1);
        if running.exec_count > 0 {
            return Ok(None);
        }

        let outgoing = self.current;
        let incoming = self
            .queue
            .get(1)
            .or_else(|| self.queue.front())
            .copied()
            .unwrap_or(Pid::KERNEL);
        self.check_switch(memory, outgoing, incoming)?;

        let running = self.running_mut();
        running.exec_count = running.priority;
        running.state = ProcessState::Active;
        self.queue.rotate_left(1);

        self.unmap_tables(memory, outgoing)?;
        self.map_tables(memory, incoming)?;
        memory.space_mut().flush_tlb();

        self.current = incoming;
        self.running_mut().state = ProcessState::Running;
        trace!("tick {}: {outgoing} -> {incoming}", self.ticks);
        Ok(Some(incoming))
    }

    /// Log one process table entry.
    pub fn log_process(&self, pid: Pid) {
        let Some(p) = self.table.get(pid.as_usize()) else {
            debug!("process info ({pid}): no such slot");
            return;
        };
        debug!("process info ({pid}):");
        debug!("    ppid: {}", p.ppid);
        debug!("    start_time: {}", p.start_time);
        debug!("    state: {}", p.state.name());
        debug!("    exec_count: {}/{}", p.exec_count, p.priority);
        for node in &p.tables {
            debug!("    table {:?}: {} ({:#010x})", node.index, node.table, node.entry.into_bits());
        }
        p.context.log();
    }

    /// Log the scheduling queue, head first.
    pub fn log_queue(&self) {
        debug!("scheduling queue:");
        for pid in &self.queue {
            debug!("    {pid}");
        }
    }

    fn running_mut(&mut self) -> &mut Process {
        let idx = self.current.as_usize();
        &mut self.table[idx]
    }

    /// Next free slot at or after the cursor, wrapping once.
    fn new_pid(&mut self) -> Result<Pid, ProcessError> {
        for _ in 0..self.capacity {
            let candidate = self.cursor;
            self.cursor = (self.cursor + 1) % self.capacity;

            let free = self
                .table
                .get(candidate)
                .is_none_or(|p| p.state == ProcessState::Dead);
            if free {
                let pid = u16::try_from(candidate).map_err(|_| self.exhausted())?;
                if candidate >= self.table.len() {
                    self.table.resize_with(candidate + 1, Process::default);
                }
                return Ok(Pid::new(pid));
            }
        }
        Err(self.exhausted())
    }

    const fn exhausted(&self) -> ProcessError {
        ProcessError::PidSpaceExhausted {
            capacity: self.capacity,
        }
    }

    /// A process slot must not shadow anything but the running process's
    /// own tables.
    fn check_index<M: Mmu>(
        &self,
        memory: &KernelMemory<M>,
        index: DirectoryIndex,
    ) -> Result<(), ProcessError> {
        if index.as_usize() >= KERNEL_DIRECTORY_INDEX {
            return Err(ProcessError::KernelIndexCollision(index));
        }
        let occupied = memory.space().directory_entry(index).present();
        let running_owns = self.table[self.current.as_usize()].owns(index);
        if occupied && !running_owns {
            return Err(ProcessError::KernelIndexCollision(index));
        }
        Ok(())
    }

    /// Every slot `incoming` installs into must be empty once `outgoing`'s
    /// tables are gone.
    fn check_switch<M: Mmu>(
        &self,
        memory: &KernelMemory<M>,
        outgoing: Pid,
        incoming: Pid,
    ) -> Result<(), ProcessError> {
        let leaving = &self.table[outgoing.as_usize()];
        for node in &self.table[incoming.as_usize()].tables {
            let occupied = memory.space().directory_entry(node.index).present();
            if occupied && !leaving.owns(node.index) {
                warn!("{incoming}: directory index {} is taken, not switching", node.index);
                return Err(ProcessError::KernelIndexCollision(node.index));
            }
        }
        Ok(())
    }

    /// A fresh page table holding one user page at `page`.
    fn stack_table<M: Mmu>(
        memory: &mut KernelMemory<M>,
        page: VirtualAddress,
    ) -> Result<PageTableNode, ProcessError> {
        let table = memory.kmalloc_page()?;
        let frame = match memory.new_page() {
            Ok(frame) => frame,
            Err(e) => {
                memory.kfree(table)?;
                return Err(e.into());
            }
        };

        memory.space_mut().clear_page(table)?;
        let slot = table + TableIndex::of(page).byte_offset();
        memory
            .space_mut()
            .write_word(slot, PageEntryBits::from_frame(frame, PageEntryBits::user_rw()).into_bits());

        let table_frame = memory.space().get_pma(table)?;
        Ok(PageTableNode {
            index: DirectoryIndex::of(page),
            entry: PageEntryBits::from_frame(table_frame, PageEntryBits::user_rw()),
            table,
        })
    }

    fn unmap_tables<M: Mmu>(&self, memory: &mut KernelMemory<M>, pid: Pid) -> Result<(), ProcessError> {
        for node in &self.table[pid.as_usize()].tables {
            memory.space_mut().remove_table(node.index)?;
        }
        Ok(())
    }

    fn map_tables<M: Mmu>(&self, memory: &mut KernelMemory<M>, pid: Pid) -> Result<(), ProcessError> {
        for node in &self.table[pid.as_usize()].tables {
            memory
                .space_mut()
                .install_table(node.index, node.table, node.entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::segments::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
    use kernel_vmem::sim::{SimulatedBoot, SimulatedMachine};

    fn setup(capacity: usize) -> (KernelMemory<SimulatedMachine>, Scheduler) {
        let (machine, handoff) = SimulatedBoot::default().build();
        let mut memory = KernelMemory::new(machine, &handoff).unwrap();
        let sched = Scheduler::new(&mut memory, capacity, USER_CODE_SELECTOR, USER_DATA_SELECTOR).unwrap();
        (memory, sched)
    }

    #[test]
    fn kernel_is_pid_zero_and_not_live() {
        let (_, s) = setup(8);
        assert_eq!(s.current_pid(), Pid::KERNEL);
        assert_eq!(s.live_processes(), 0);
        let k = s.process(Pid::KERNEL).unwrap();
        assert_eq!(k.state(), ProcessState::Running);
        assert_eq!(k.exec_count(), 1);
        assert_eq!(k.priority(), KERNEL_PRIORITY);
        assert!(s.stack_top().is_aligned_to(PAGE_SIZE));
    }

    #[test]
    fn register_builds_user_context_and_stack() {
        let (mut m, mut s) = setup(8);
        let pid = s.register(&mut m, VirtualAddress::new(0x0040_0000), 5).unwrap();
        assert_eq!(pid, Pid::new(1));
        assert_eq!(s.live_processes(), 1);

        let p = s.process(pid).unwrap();
        assert_eq!(p.state(), ProcessState::Active);
        assert_eq!(p.exec_count(), 5);
        assert_eq!(p.parent(), Pid::KERNEL);
        assert_eq!(p.context().esp(), USER_STACK_TOP);
        assert_eq!(p.context().eip(), 0x0040_0000);

        let [node] = p.page_tables() else {
            panic!("expected one page table");
        };
        assert_eq!(node.index, DirectoryIndex::new(767));
        assert!(node.entry.present() && node.entry.user() && node.entry.writable());
        let stack_entry = PageEntryBits::from_bits(m.space().read_word(node.table + 1023 * 4));
        assert!(stack_entry.present() && stack_entry.user());

        // Nothing is installed until the process runs, but the slot is
        // already closed to kernel mappings.
        assert!(!m.space().directory_entry(node.index).present());
        assert!(m.space().is_private(node.index));
        assert_eq!(s.queue().collect::<Vec<_>>(), [Pid::KERNEL, pid]);
    }

    #[test]
    fn zero_priority_is_rejected() {
        let (mut m, mut s) = setup(8);
        assert_eq!(
            s.register(&mut m, VirtualAddress::new(0x0040_0000), 0),
            Err(ProcessError::InvalidPriority)
        );
    }

    #[test]
    fn full_table_reports_exhaustion() {
        let (mut m, mut s) = setup(3);
        s.register(&mut m, VirtualAddress::new(0x1000), 1).unwrap();
        s.register(&mut m, VirtualAddress::new(0x2000), 1).unwrap();
        assert_eq!(
            s.register(&mut m, VirtualAddress::new(0x3000), 1),
            Err(ProcessError::PidSpaceExhausted { capacity: 3 })
        );
        assert_eq!(s.live_processes(), 2);
    }

    #[test]
    fn foreign_directory_entry_blocks_registration() {
        let (mut m, mut s) = setup(8);
        let frame = m.new_page().unwrap();
        m.map(VirtualAddress::new(0xBFC0_0000), frame, PageEntryBits::kernel_rw())
            .unwrap();
        assert_eq!(
            s.register(&mut m, VirtualAddress::new(0x1000), 1),
            Err(ProcessError::KernelIndexCollision(DirectoryIndex::new(767)))
        );
    }

    #[test]
    fn unknown_pid_has_no_context() {
        let (_, s) = setup(8);
        assert!(s.context(Pid::KERNEL).is_ok());
        assert_eq!(s.context(Pid::new(5)), Err(ProcessError::UnknownPid(Pid::new(5))));
    }

    #[test]
    fn context_round_trip() {
        let (_, mut s) = setup(8);
        let ctx = SavedContext::default().with_eax(42).with_eip(0xC010_0000);
        s.store_context(&ctx);
        assert_eq!(s.load_context(), ctx);
    }
}
