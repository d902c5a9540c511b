//! # Simulated i386 Machine
//!
//! Host-side stand-in for the MMU: word-addressable RAM, a CR3 register, the
//! two-level hardware page walk and a TLB that keeps translations until they
//! are invalidated. Forgetting an `invlpg` after changing a present entry is
//! observable here exactly as on hardware: the old frame keeps being used.
//!
//! [`SimulatedBoot`] builds the state the external bootstrap hands over
//! (kernel image mapped at [`KERNEL_BASE`], recursive directory slot,
//! [`BootHandoff`]); [`BumpPool`] is the simplest possible [`PagePool`].

use crate::info::{KERNEL_BASE, PAGE_SIZE, PHYS_LOAD, RECURSIVE_INDEX};
use crate::{DirectoryIndex, Mmu, OutOfMemory, PageEntryBits, PagePool, TableIndex};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use kernel_info::boot::BootHandoff;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};

/// Counters for the translation-maintenance operations the core issued.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct MmuStats {
    /// CR3 writes, including full flushes.
    pub directory_loads: usize,
    /// Single-page invalidations.
    pub page_invalidations: usize,
}

/// RAM + CR3 + TLB.
pub struct SimulatedMachine {
    ram: Vec<u32>,
    cr3: PhysicalAddress,
    tlb: RefCell<BTreeMap<VirtualPage<Size4K>, PhysicalPage<Size4K>>>,
    stats: MmuStats,
}

impl SimulatedMachine {
    /// `bytes` of zeroed RAM, paging on with directory `cr3`.
    #[must_use]
    pub fn new(bytes: u32, cr3: PhysicalAddress) -> Self {
        Self {
            ram: vec![0; (bytes / 4) as usize],
            cr3,
            tlb: RefCell::new(BTreeMap::new()),
            stats: MmuStats::default(),
        }
    }

    /// Size of installed RAM in bytes.
    #[must_use]
    pub fn ram_bytes(&self) -> u32 {
        u32::try_from(self.ram.len() * 4).unwrap_or(u32::MAX)
    }

    /// Read a physical word, bypassing translation.
    #[must_use]
    pub fn read_phys(&self, pa: PhysicalAddress) -> u32 {
        self.ram[Self::word(pa)]
    }

    /// Write a physical word, bypassing translation.
    pub fn write_phys(&mut self, pa: PhysicalAddress, value: u32) {
        let i = Self::word(pa);
        self.ram[i] = value;
    }

    /// Frame backing `va` according to the tables in RAM, ignoring the TLB.
    /// Never faults.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let pde = PageEntryBits::from_bits(
            self.read_phys(self.cr3 + DirectoryIndex::of(va).byte_offset()),
        );
        if !pde.present() {
            return None;
        }
        let pte = PageEntryBits::from_bits(self.read_phys(pde.frame() + TableIndex::of(va).byte_offset()));
        pte.present().then(|| pte.frame())
    }

    /// Translate the way the CPU would: cached translation first, then a walk.
    #[must_use]
    pub fn try_translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (page, offset) = va.split::<Size4K>();
        if let Some(frame) = self.tlb.borrow().get(&page) {
            return Some(frame.join(offset));
        }
        self.walk(va).map(|frame| frame.page::<Size4K>().join(offset))
    }

    /// Number of cached translations.
    #[must_use]
    pub fn tlb_entries(&self) -> usize {
        self.tlb.borrow().len()
    }

    #[must_use]
    pub const fn stats(&self) -> MmuStats {
        self.stats
    }

    fn translate(&self, va: VirtualAddress) -> PhysicalAddress {
        assert!(va.is_aligned_to(4), "unaligned word access at {va:?}");
        let (page, offset) = va.split::<Size4K>();
        if let Some(frame) = self.tlb.borrow().get(&page) {
            return frame.join(offset);
        }
        let Some(frame) = self.walk(va) else {
            panic!("page fault at {va:?} (cr3 {:?})", self.cr3);
        };
        let frame = frame.page::<Size4K>();
        self.tlb.borrow_mut().insert(page, frame);
        frame.join(offset)
    }

    fn word(pa: PhysicalAddress) -> usize {
        (pa.as_u32() / 4) as usize
    }
}

impl Mmu for SimulatedMachine {
    fn read_word(&self, va: VirtualAddress) -> u32 {
        self.read_phys(self.translate(va))
    }

    fn write_word(&mut self, va: VirtualAddress, value: u32) {
        let pa = self.translate(va);
        self.write_phys(pa, value);
    }

    fn page_directory(&self) -> PhysicalAddress {
        self.cr3
    }

    fn load_page_directory(&mut self, directory: PhysicalAddress) {
        self.cr3 = directory;
        self.tlb.get_mut().clear();
        self.stats.directory_loads += 1;
    }

    fn invalidate_page(&mut self, va: VirtualAddress) {
        self.tlb.get_mut().remove(&va.page::<Size4K>());
        self.stats.page_invalidations += 1;
    }
}

/// Builds the machine state the bootstrap leaves behind.
///
/// Physical layout: kernel image at [`PHYS_LOAD`], then the page directory,
/// then the page table covering [`KERNEL_BASE`]. The free watermark follows
/// that table.
#[derive(Debug, Copy, Clone)]
pub struct SimulatedBoot {
    ram_bytes: u32,
    image_pages: u32,
    memory_end: Option<u32>,
}

impl Default for SimulatedBoot {
    fn default() -> Self {
        Self {
            ram_bytes: 8 << 20,
            image_pages: 16,
            memory_end: None,
        }
    }
}

impl SimulatedBoot {
    /// Installed RAM in bytes.
    #[must_use]
    pub const fn ram(mut self, bytes: u32) -> Self {
        self.ram_bytes = bytes;
        self
    }

    /// Size of the kernel image in pages (at most one page table's worth).
    #[must_use]
    pub const fn image_pages(mut self, pages: u32) -> Self {
        self.image_pages = pages;
        self
    }

    /// Report less memory to the kernel than is installed, to provoke
    /// exhaustion early.
    #[must_use]
    pub const fn memory_end(mut self, bytes: u32) -> Self {
        self.memory_end = Some(bytes);
        self
    }

    /// Physical address of the page directory this builder will produce.
    #[must_use]
    pub const fn directory(&self) -> PhysicalAddress {
        PhysicalAddress::new(PHYS_LOAD + self.image_pages * PAGE_SIZE)
    }

    #[must_use]
    pub fn build(self) -> (SimulatedMachine, BootHandoff) {
        assert!(self.image_pages as usize <= crate::info::PAGE_ENTRIES);
        let directory = self.directory();
        let kernel_table = directory + PAGE_SIZE;
        let watermark = kernel_table + PAGE_SIZE;

        let mut machine = SimulatedMachine::new(self.ram_bytes, directory);
        let kernel = DirectoryIndex::of(VirtualAddress::new(KERNEL_BASE));
        machine.write_phys(
            directory + kernel.byte_offset(),
            PageEntryBits::from_frame(kernel_table, PageEntryBits::kernel_rw()).into_bits(),
        );
        machine.write_phys(
            directory + DirectoryIndex::new(RECURSIVE_INDEX).byte_offset(),
            PageEntryBits::from_frame(directory, PageEntryBits::kernel_rw()).into_bits(),
        );
        for page in 0..self.image_pages {
            let frame = PhysicalAddress::new(PHYS_LOAD + page * PAGE_SIZE);
            machine.write_phys(
                kernel_table + page * 4,
                PageEntryBits::from_frame(frame, PageEntryBits::kernel_rw()).into_bits(),
            );
        }

        let handoff = BootHandoff::new(
            directory,
            watermark,
            PhysicalAddress::new(self.memory_end.unwrap_or(self.ram_bytes)),
            VirtualAddress::new(KERNEL_BASE + self.image_pages * PAGE_SIZE),
        );
        (machine, handoff)
    }
}

/// A trivial **bump** pool: hands out the next 4 KiB frame and never reuses.
#[derive(Debug)]
pub struct BumpPool {
    next: PhysicalAddress,
    end: PhysicalAddress,
}

impl BumpPool {
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { next: start, end }
    }

    /// The frame the next call to [`PagePool::new_page`] returns.
    #[must_use]
    pub const fn peek(&self) -> PhysicalAddress {
        self.next
    }
}

impl PagePool for BumpPool {
    fn new_page(&mut self) -> Result<PhysicalAddress, OutOfMemory> {
        if self.next.as_u32() + PAGE_SIZE > self.end.as_u32() {
            return Err(OutOfMemory);
        }
        let frame = self.next;
        self.next += PAGE_SIZE;
        Ok(frame)
    }
}
