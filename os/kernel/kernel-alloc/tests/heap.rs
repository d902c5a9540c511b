use kernel_alloc::{Arena, HeapError, KernelMemory};
use kernel_info::memory::{KERNEL_HEAP_BASE, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::sim::{BumpPool, SimulatedBoot, SimulatedMachine};

fn memory() -> KernelMemory<SimulatedMachine> {
    let (machine, handoff) = SimulatedBoot::default().build();
    KernelMemory::new(machine, &handoff).unwrap()
}

fn assert_consistent(m: &KernelMemory<SimulatedMachine>) {
    for arena in Arena::ALL {
        if let Err(e) = m.check_heap(arena) {
            panic!("{arena:?}: {e}");
        }
    }
}

#[test]
fn small_allocations_grow_by_size_plus_descriptor() {
    let mut m = memory();
    let start = m.heap(Arena::Kernel).end();

    let p1 = m.kmalloc(1).unwrap();
    let p2 = m.kmalloc(23).unwrap();
    let p3 = m.kmalloc(12).unwrap();
    let p4 = m.kmalloc(24).unwrap();

    assert_eq!(m.heap(Arena::Kernel).end() - start, 4 * 8 + (8 + 24 + 16 + 24));
    assert_eq!(p1, VirtualAddress::new(KERNEL_HEAP_BASE + 8));
    assert_eq!(p2, p1 + 16);
    assert_eq!(p3, p2 + 32);
    assert_eq!(p4, p3 + 24);

    m.kfree(p2).unwrap();
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), Some(p2));

    // Splitting keeps the list slot: the remainder takes over.
    assert_eq!(m.kmalloc(8).unwrap(), p2);
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), Some(p2 + 16));

    let report = m.check_heap(Arena::Kernel).unwrap();
    assert_eq!(report.chunks, 5);
    assert_eq!(report.free_chunks, 1);
    assert_eq!(report.free_bytes, 8);
    assert_consistent(&m);
}

#[test]
fn exact_fit_is_reused() {
    let mut m = memory();
    let p = m.kmalloc(40).unwrap();
    let _guard = m.kmalloc(8).unwrap();
    let end = m.heap(Arena::Kernel).end();

    m.kfree(p).unwrap();
    assert_eq!(m.kmalloc(40).unwrap(), p);
    assert_eq!(m.heap(Arena::Kernel).end(), end);
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), None);
    assert_consistent(&m);
}

#[test]
fn chunk_too_small_to_split_is_skipped() {
    let mut m = memory();
    let p = m.kmalloc(16).unwrap();
    let _guard = m.kmalloc(8).unwrap();
    m.kfree(p).unwrap();

    // 16 = 8 + one descriptor: no room for a free remainder.
    let q = m.kmalloc(8).unwrap();
    assert_ne!(q, p);
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), Some(p));
    assert_consistent(&m);
}

#[test]
fn adjacent_frees_coalesce_in_any_order() {
    const ORDERS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let sizes = [16, 24, 40];

    for order in ORDERS {
        let mut m = memory();
        let chunks = sizes.map(|s| m.kmalloc(s).unwrap());
        let _guard = m.kmalloc(8).unwrap();

        for i in order {
            m.kfree(chunks[i]).unwrap();
            assert_consistent(&m);
        }

        let report = m.check_heap(Arena::Kernel).unwrap();
        assert_eq!(report.free_chunks, 1, "{order:?}");
        assert_eq!(report.free_bytes, 16 + 24 + 40 + 2 * 8, "{order:?}");
        assert_eq!(m.heap(Arena::Kernel).free_list_head(), Some(chunks[0]), "{order:?}");
    }
}

#[test]
fn freeing_the_tail_shrinks_the_heap() {
    let mut m = memory();
    let before = m.heap(Arena::Kernel).end();

    let p = m.kmalloc(2 * PAGE_SIZE).unwrap();
    let first = VirtualAddress::new(KERNEL_HEAP_BASE + PAGE_SIZE);
    let second = first + PAGE_SIZE;
    let f1 = m.space().get_pma(first).unwrap();
    let f2 = m.space().get_pma(second).unwrap();

    // Something already waiting on the free list.
    let other = m.new_page().unwrap();
    m.release_frame(other).unwrap();

    m.kfree(p).unwrap();
    assert_eq!(m.heap(Arena::Kernel).end(), before);
    assert!(!m.space().is_present(first).unwrap());
    assert!(!m.space().is_present(second).unwrap());
    assert!(m.space().is_present(VirtualAddress::new(KERNEL_HEAP_BASE)).unwrap());

    assert_eq!(m.new_page().unwrap(), f2);
    assert_eq!(m.new_page().unwrap(), f1);
    assert_eq!(m.new_page().unwrap(), other);
    assert_consistent(&m);
}

#[test]
fn freeing_the_tail_absorbs_free_predecessor() {
    let mut m = memory();
    let before = m.heap(Arena::Kernel).end();
    let a = m.kmalloc(32).unwrap();
    let b = m.kmalloc(64).unwrap();

    m.kfree(a).unwrap();
    m.kfree(b).unwrap();
    assert_eq!(m.heap(Arena::Kernel).end(), before);
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), None);
    assert_consistent(&m);
}

#[test]
fn alignment_gap_of_one_descriptor_is_rejected() {
    let mut m = memory();
    let end = m.heap(Arena::Kernel).end();

    // The heap ends 8 bytes short of a 16-byte boundary.
    assert_eq!(
        m.kmalloc_aligned(32, 16),
        Err(HeapError::InvalidAlignmentGap { gap: 8 })
    );
    assert_eq!(m.heap(Arena::Kernel).end(), end);
    assert_eq!(m.kmalloc_aligned(32, 12), Err(HeapError::InvalidAlignment(12)));
    assert_consistent(&m);
}

#[test]
fn alignment_gap_becomes_a_free_chunk() {
    let mut m = memory();
    let small = m.kmalloc(16).unwrap();
    let gap_start = m.heap(Arena::Kernel).end();

    let page = m.kmalloc_aligned(64, PAGE_SIZE).unwrap();
    assert!(page.is_aligned_to(PAGE_SIZE));
    assert_eq!(page, VirtualAddress::new(KERNEL_HEAP_BASE + PAGE_SIZE));
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), Some(gap_start));

    let report = m.check_heap(Arena::Kernel).unwrap();
    assert_eq!(report.free_chunks, 1);
    assert_eq!(report.free_bytes, page - gap_start - 8);

    // Default-aligned requests may use the gap.
    let reused = m.kmalloc(32).unwrap();
    assert_eq!(reused, gap_start);
    assert!(reused > small);
    assert_consistent(&m);
}

#[test]
fn caller_supplied_page_source_backs_new_pages() {
    let (machine, handoff) = SimulatedBoot::default().memory_end(6 << 20).build();
    let mut m = KernelMemory::new(machine, &handoff).unwrap();
    let mut pool = BumpPool::new(PhysicalAddress::new(7 << 20), PhysicalAddress::new(8 << 20));
    let free = m.free_frames();

    let table = m.kalloc(Some(&mut pool), PAGE_SIZE, PAGE_SIZE).unwrap();
    assert_eq!(m.space().get_pma(table).unwrap(), PhysicalAddress::new(7 << 20));
    assert_eq!(pool.peek(), PhysicalAddress::new((7 << 20) + 2 * PAGE_SIZE));
    assert_eq!(m.free_frames(), free);
    assert_consistent(&m);
}

#[test]
fn exhaustion_is_reported_and_rolled_back() {
    // Enough frames for both arenas (a table and a page each) plus two.
    let boot = SimulatedBoot::default();
    let watermark = boot.directory().as_u32() + 2 * PAGE_SIZE;
    let (machine, handoff) = boot.memory_end(watermark + 6 * PAGE_SIZE).build();
    let mut m = KernelMemory::new(machine, &handoff).unwrap();
    assert_eq!(m.free_frames(), 2);
    let end = m.heap(Arena::Kernel).end();

    // Needs three new pages.
    assert!(matches!(m.kmalloc(3 * PAGE_SIZE), Err(HeapError::OutOfMemory(_))));
    assert_eq!(m.heap(Arena::Kernel).end(), end);
    assert_eq!(m.free_frames(), 2);
    assert!(!m.space().is_present(VirtualAddress::new(KERNEL_HEAP_BASE + PAGE_SIZE)).unwrap());
    assert_consistent(&m);

    // Smaller requests still succeed afterwards.
    let p = m.kmalloc(PAGE_SIZE).unwrap();
    assert_eq!(p, end);
    assert_consistent(&m);
}

#[test]
fn bad_frees_are_rejected() {
    let mut m = memory();
    let p = m.kmalloc(8).unwrap();
    let _q = m.kmalloc(8).unwrap();

    m.kfree(p).unwrap();
    assert_eq!(m.kfree(p), Err(HeapError::DoubleFree(p)));
    assert_eq!(m.kfree(p + 4), Err(HeapError::InvalidAddress(p + 4)));

    let outside = VirtualAddress::new(0x0040_0000);
    assert_eq!(m.kfree(outside), Err(HeapError::InvalidAddress(outside)));
    let past_end = m.heap(Arena::Kernel).end();
    assert_eq!(m.kfree(past_end), Err(HeapError::InvalidAddress(past_end)));
    assert_consistent(&m);
}

#[test]
fn many_pages_round_trip_through_the_pool() {
    let mut m = memory();
    let free = m.free_frames();

    let blocks: Vec<_> = (0..8).map(|_| m.kmalloc(3 * PAGE_SIZE / 2).unwrap()).collect();
    assert!(m.free_frames() < free);
    for b in blocks.into_iter().rev() {
        m.kfree(b).unwrap();
    }

    // Only the frame-list arena keeps what it grew for the list nodes.
    assert_eq!(m.heap(Arena::Kernel).end(), VirtualAddress::new(KERNEL_HEAP_BASE + 8));
    assert_eq!(m.free_frames(), free);
    assert_consistent(&m);
}

#[test]
fn page_allocation_pads_a_descriptor_sized_gap() {
    let mut m = memory();
    // The empty heap ends 8 bytes in; a chunk costs its size plus one
    // descriptor, so this leaves the end one descriptor below the boundary.
    m.kmalloc(PAGE_SIZE - 24).unwrap();
    assert_eq!(
        m.heap(Arena::Kernel).end(),
        VirtualAddress::new(KERNEL_HEAP_BASE + PAGE_SIZE - 8)
    );
    assert!(matches!(
        m.kmalloc_aligned(PAGE_SIZE, PAGE_SIZE),
        Err(HeapError::InvalidAlignmentGap { gap: 8 })
    ));

    let page = m.kmalloc_page().unwrap();
    assert_eq!(page, VirtualAddress::new(KERNEL_HEAP_BASE + 2 * PAGE_SIZE));
    assert_eq!(
        m.heap(Arena::Kernel).end(),
        VirtualAddress::new(KERNEL_HEAP_BASE + 3 * PAGE_SIZE + 8)
    );

    // Padding and gap end up as one free chunk.
    let report = m.check_heap(Arena::Kernel).unwrap();
    assert_eq!(report.free_chunks, 1);
    assert_eq!(report.free_bytes, PAGE_SIZE);
    assert_eq!(
        m.heap(Arena::Kernel).free_list_head(),
        Some(VirtualAddress::new(KERNEL_HEAP_BASE + PAGE_SIZE - 8))
    );
    assert_consistent(&m);
}

#[test]
fn sizes_beyond_the_address_space_are_out_of_memory() {
    let mut m = memory();
    let end = m.heap(Arena::Kernel).end();
    let free = m.free_frames();

    for bytes in [u32::MAX, 0xFFFF_FFF8, 0xFFFF_FFF0] {
        assert!(matches!(m.kmalloc(bytes), Err(HeapError::OutOfMemory(_))), "{bytes:#x}");
        assert!(matches!(
            m.kmalloc_aligned(bytes, PAGE_SIZE),
            Err(HeapError::OutOfMemory(_))
        ));
        assert!(matches!(m.kalloc(None, 16, bytes), Err(HeapError::OutOfMemory(_))));
        assert!(matches!(m.kmalloc_tail(bytes), Err(HeapError::OutOfMemory(_))));
    }

    // A free chunk on the list must not make a huge request look like a fit.
    let p = m.kmalloc(64).unwrap();
    let guard = m.kmalloc(8).unwrap();
    m.kfree(p).unwrap();
    assert!(matches!(m.kmalloc(0xFFFF_FFF8), Err(HeapError::OutOfMemory(_))));
    assert_eq!(m.heap(Arena::Kernel).free_list_head(), Some(p));

    m.kfree(guard).unwrap();
    assert_eq!(m.heap(Arena::Kernel).end(), end);
    assert_eq!(m.free_frames(), free);
    assert_consistent(&m);
}
