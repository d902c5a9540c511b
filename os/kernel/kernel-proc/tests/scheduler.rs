use kernel_alloc::{HeapError, KernelMemory};
use kernel_info::memory::{PAGE_SIZE, USER_STACK_TOP};
use kernel_info::segments::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use kernel_memory_addresses::VirtualAddress;
use kernel_proc::{Pid, ProcessError, ProcessState, Scheduler};
use kernel_sync::{InterruptControl, SoftInterrupts};
use kernel_vmem::{DirectoryIndex, PageEntryBits, PagingError};
use kernel_vmem::sim::{SimulatedBoot, SimulatedMachine};
use std::collections::BTreeMap;

fn boot() -> (KernelMemory<SimulatedMachine>, Scheduler) {
    let (machine, handoff) = SimulatedBoot::default().build();
    let mut memory = KernelMemory::new(machine, &handoff).unwrap();
    let sched = Scheduler::new(&mut memory, 64, USER_CODE_SELECTOR, USER_DATA_SELECTOR).unwrap();
    (memory, sched)
}

fn spawn(m: &mut KernelMemory<SimulatedMachine>, s: &mut Scheduler, priorities: &[u16]) -> Vec<Pid> {
    priorities
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let entry = VirtualAddress::new(0x0040_0000 + u32::try_from(i).unwrap() * PAGE_SIZE);
            s.register(m, entry, p).unwrap()
        })
        .collect()
}

/// Run `ticks` timer ticks and record who runs after each one.
fn run(m: &mut KernelMemory<SimulatedMachine>, s: &mut Scheduler, irq: &SoftInterrupts, ticks: usize) -> Vec<Pid> {
    (0..ticks)
        .map(|_| {
            s.reschedule(m, irq).unwrap();
            s.current_pid()
        })
        .collect()
}

#[test]
fn priorities_30_10_10_rotate_in_order() {
    let (mut m, mut s) = boot();
    let pids = spawn(&mut m, &mut s, &[30, 10, 10]);
    assert_eq!(s.live_processes(), 3);

    let irq = SoftInterrupts::default();
    let trace = run(&mut m, &mut s, &irq, 61);

    // trace[i] is the process running after tick i + 1.
    assert!(trace[0..30].iter().all(|&p| p == pids[0]));
    assert!(trace[30..40].iter().all(|&p| p == pids[1]));
    assert!(trace[40..50].iter().all(|&p| p == pids[2]));
    assert!(trace[50..60].iter().all(|&p| p == Pid::KERNEL));
    assert_eq!(trace[60], pids[0]);

    // Every tick ran inside its own non-preemptible section.
    assert_eq!(irq.disable_count(), 61);
    assert!(irq.enabled());
    assert_eq!(s.ticks(), 61);
}

#[test]
fn exactly_one_process_runs() {
    let (mut m, mut s) = boot();
    let mut pids = spawn(&mut m, &mut s, &[3, 2, 4]);
    pids.push(Pid::KERNEL);
    let irq = SoftInterrupts::default();

    for _ in 0..40 {
        s.reschedule(&mut m, &irq).unwrap();
        let running: Vec<_> = pids
            .iter()
            .filter(|&&p| s.process(p).unwrap().state() == ProcessState::Running)
            .collect();
        assert_eq!(running, [&s.current_pid()]);
        assert_eq!(s.queue().next(), Some(s.current_pid()));
    }
}

#[test]
fn running_time_follows_priority() {
    let (mut m, mut s) = boot();
    let priorities = [5u16, 7, 11];
    let pids = spawn(&mut m, &mut s, &priorities);
    let irq = SoftInterrupts::default();

    let total: u16 = priorities.iter().sum::<u16>() + kernel_proc::KERNEL_PRIORITY;
    let ticks = usize::from(total) * 20;
    let mut counts = BTreeMap::<Pid, usize>::new();
    for pid in run(&mut m, &mut s, &irq, ticks) {
        *counts.entry(pid).or_default() += 1;
    }

    for (pid, p) in pids.iter().zip(priorities) {
        let expected = ticks * usize::from(p) / usize::from(total);
        let got = counts[pid];
        assert!(
            got.abs_diff(expected) <= usize::from(total),
            "{pid}: {got} ticks, expected about {expected}"
        );
    }
}

#[test]
fn switches_leave_kernel_directory_entries_alone() {
    let (mut m, mut s) = boot();
    m.preallocate_kernel_tables(768..1023).unwrap();
    let pids = spawn(&mut m, &mut s, &[2, 3, 1]);

    let stack_index = DirectoryIndex::of(VirtualAddress::new(USER_STACK_TOP - PAGE_SIZE));
    let snapshot: Vec<_> = DirectoryIndex::all()
        .map(|i| m.space().directory_entry(i))
        .collect();
    let irq = SoftInterrupts::default();

    for _ in 0..30 {
        s.reschedule(&mut m, &irq).unwrap();
        let current = s.current_pid();
        for i in DirectoryIndex::all() {
            let entry = m.space().directory_entry(i);
            if i != stack_index {
                assert_eq!(entry, snapshot[i.as_usize()], "{i:?} changed");
                continue;
            }
            if current == Pid::KERNEL {
                assert!(!entry.present());
            } else {
                let node = s.process(current).unwrap().page_tables()[0];
                assert_eq!(entry, node.entry);
                assert_eq!(m.space().table_vma(i), Some(node.table));
            }
        }
    }
    assert!(pids.iter().all(|&p| s.process(p).is_some()));
}

#[test]
fn each_process_sees_its_own_stack() {
    let (mut m, mut s) = boot();
    let pids = spawn(&mut m, &mut s, &[1, 1, 1]);
    let irq = SoftInterrupts::default();
    let stack = VirtualAddress::new(USER_STACK_TOP - 4);
    let loads = m.space().mmu().stats().directory_loads;

    // Each process writes its PID on its first turn and must find it again
    // on its second, whoever ran in between.
    let mut seen = BTreeMap::<Pid, usize>::new();
    let mut switches = 0;
    for _ in 0..30 {
        let Some(pid) = s.reschedule(&mut m, &irq).unwrap() else {
            continue;
        };
        switches += 1;
        if pid == Pid::KERNEL {
            continue;
        }
        let turns = seen.entry(pid).or_default();
        if *turns == 0 {
            m.space_mut().write_word(stack, u32::from(pid.as_u16()));
        } else {
            assert_eq!(m.space().read_word(stack), u32::from(pid.as_u16()));
        }
        *turns += 1;
    }

    assert!(pids.iter().all(|p| seen[p] >= 2));
    // Every switch reloaded the directory.
    assert_eq!(m.space().mmu().stats().directory_loads - loads, switches);
}

#[test]
fn registration_while_a_process_runs() {
    let (mut m, mut s) = boot();
    let first = spawn(&mut m, &mut s, &[5])[0];
    let irq = SoftInterrupts::default();
    s.reschedule(&mut m, &irq).unwrap();
    assert_eq!(s.current_pid(), first);

    // The running process's own table occupies the stack slot; that is fine.
    let second = s.register(&mut m, VirtualAddress::new(0x0080_0000), 5).unwrap();
    assert_eq!(s.process(second).unwrap().parent(), first);
    assert_eq!(s.process(second).unwrap().start_time(), 1);
    assert_ne!(
        s.process(second).unwrap().page_tables()[0].table,
        s.process(first).unwrap().page_tables()[0].table
    );
}

#[test]
fn kernel_mappings_stay_out_of_process_slots() {
    let (mut m, mut s) = boot();
    let pid = spawn(&mut m, &mut s, &[1])[0];
    let slot = DirectoryIndex::new(767);
    let va = VirtualAddress::new(0xBFC0_1000);
    let refused = Err(HeapError::Paging(PagingError::PrivateIndex(slot)));

    let frame = m.new_page().unwrap();
    let free = m.free_frames();
    assert_eq!(m.map(va, frame, PageEntryBits::kernel_rw()), refused);
    assert_eq!(m.free_frames(), free);
    assert!(m.space().directory_entry(slot).is_empty());

    let irq = SoftInterrupts::default();
    assert_eq!(s.reschedule(&mut m, &irq).unwrap(), Some(pid));
    let node = s.process(pid).unwrap().page_tables()[0];
    assert_eq!(m.space().directory_entry(slot), node.entry);
    assert_eq!(m.map(va, frame, PageEntryBits::kernel_rw()), refused);

    assert_eq!(s.reschedule(&mut m, &irq).unwrap(), Some(Pid::KERNEL));
    assert!(m.space().directory_entry(slot).is_empty());
    assert_eq!(m.space().translate(va), None);

    // The process still finds its own stack on its next turn.
    assert_eq!(run(&mut m, &mut s, &irq, 10).last(), Some(&pid));
    assert_eq!(m.space().directory_entry(slot), node.entry);
}

#[test]
fn switch_refuses_to_cover_a_foreign_table() {
    let (mut m, mut s) = boot();
    let pid = spawn(&mut m, &mut s, &[3])[0];
    let slot = DirectoryIndex::new(767);

    // A table that went in behind the address space's back.
    let table = m.kmalloc_page().unwrap();
    m.space_mut().clear_page(table).unwrap();
    let frame = m.space().get_pma(table).unwrap();
    let foreign = PageEntryBits::from_frame(frame, PageEntryBits::kernel_rw());
    m.space_mut().install_table(slot, table, foreign).unwrap();

    let irq = SoftInterrupts::default();
    assert_eq!(
        s.reschedule(&mut m, &irq),
        Err(ProcessError::KernelIndexCollision(slot))
    );
    assert_eq!(s.current_pid(), Pid::KERNEL);
    assert_eq!(s.queue().next(), Some(Pid::KERNEL));
    assert_eq!(m.space().directory_entry(slot), foreign);
    assert_eq!(m.space().table_vma(slot), Some(table));
    assert_eq!(s.process(pid).unwrap().state(), ProcessState::Active);
    assert!(irq.enabled());

    // Once the slot is free again the pending switch goes through.
    m.space_mut().remove_table(slot).unwrap();
    assert_eq!(s.reschedule(&mut m, &irq).unwrap(), Some(pid));
    assert_eq!(
        m.space().directory_entry(slot),
        s.process(pid).unwrap().page_tables()[0].entry
    );
}
