use crate::KernelError;
use kernel_alloc::KernelMemory;
use kernel_info::boot::BootHandoff;
use kernel_info::memory::{KERNEL_DIRECTORY_INDEX, PAGE_ENTRIES};
use kernel_memory_addresses::VirtualAddress;
use kernel_proc::{Pid, SavedContext, Scheduler};
use kernel_sync::{InterruptControl, IrqGuard};
use kernel_vmem::Mmu;
use log::{error, info};

/// The one instance of kernel state: memory core plus process table.
pub struct KernelState<M: Mmu> {
    memory: KernelMemory<M>,
    scheduler: Scheduler,
}

impl<M: Mmu> KernelState<M> {
    /// Take over from the bootstrap.
    ///
    /// Validates the handoff, adopts the loaded page directory, creates both
    /// heap arenas, gives every kernel directory index a page table and
    /// sets up the process table with room for `process_slots` PIDs.
    ///
    /// # Errors
    /// - [`KernelError::Handoff`] for an inconsistent handoff record.
    /// - [`KernelError::Memory`] if the directory can not be adopted or
    ///   memory runs out while building the kernel tables.
    /// - [`KernelError::Process`] if the scheduler stack can not be allocated.
    pub fn boot(mmu: M, handoff: &BootHandoff, process_slots: usize) -> Result<Self, KernelError> {
        handoff.validate()?;

        let mut memory = KernelMemory::new(mmu, handoff)?;
        memory.preallocate_kernel_tables(KERNEL_DIRECTORY_INDEX..PAGE_ENTRIES)?;

        let scheduler = Scheduler::new(
            &mut memory,
            process_slots,
            handoff.user_code_selector(),
            handoff.user_data_selector(),
        )?;

        info!(
            "kernel up: {} frames free, scheduler stack top {}",
            memory.free_frames(),
            scheduler.stack_top()
        );
        Ok(Self { memory, scheduler })
    }

    #[inline]
    #[must_use]
    pub const fn memory(&self) -> &KernelMemory<M> {
        &self.memory
    }

    #[inline]
    pub const fn memory_mut(&mut self) -> &mut KernelMemory<M> {
        &mut self.memory
    }

    #[inline]
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// True while user processes are registered; the idle loop spins on it.
    #[inline]
    #[must_use]
    pub const fn has_processes(&self) -> bool {
        self.scheduler.live_processes() > 0
    }

    /// Register a process starting at `entry` with a slice of `priority`
    /// ticks.
    ///
    /// # Errors
    /// [`KernelError::Process`] as reported by [`Scheduler::register`].
    pub fn spawn(&mut self, entry: VirtualAddress, priority: u16) -> Result<Pid, KernelError> {
        Ok(self.scheduler.register(&mut self.memory, entry, priority)?)
    }

    /// The timer preemption hook.
    ///
    /// `ctx` is the register image the interrupt stub saved; on return it
    /// holds the image to resume with, which belongs to a different process
    /// if the running one used up its slice. `eoi` acknowledges the
    /// interrupt and is called exactly once, after the switch.
    ///
    /// Returns the PID that took over, if any.
    ///
    /// # Errors
    /// [`KernelError::Process`] if the page-table switch failed. The
    /// interrupted process keeps running and the interrupt is still
    /// acknowledged.
    pub fn tick<I, E>(
        &mut self,
        irq: &I,
        ctx: &mut SavedContext,
        eoi: E,
    ) -> Result<Option<Pid>, KernelError>
    where
        I: InterruptControl + ?Sized,
        E: FnOnce(),
    {
        let _guard = IrqGuard::new(irq);

        self.scheduler.store_context(ctx);
        let switched = self.scheduler.reschedule(&mut self.memory, irq);
        *ctx = self.scheduler.load_context();
        eoi();

        switched.map_err(|e| {
            error!("tick {}: switch failed: {e}", self.scheduler.ticks());
            e.into()
        })
    }
}
