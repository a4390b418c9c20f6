//! Memory management: physical frame allocation, 4-level paging, the region
//! tracker, and the fast hierarchical mapper/unmapper built on top of them.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use crate::println;

pub mod bootloader;
pub mod demand_paging;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod paging;
pub mod region;
pub mod user_validation;
pub mod vas;
pub mod walker;

pub use frame_allocator::{
    alloc_physical_page, buddy_metadata_size, free_physical_page, set_physical_page_mark,
    FrameAllocatorError, FrameNumber, PhysicalAddress, PhysicalFrame, FRAME_ALLOCATOR, FRAME_SIZE,
};
pub use page_fault::resolve_kernel_page_fault;
pub use region::{RegionDescriptor, RegionFlags, RegionTracker};
pub use walker::walk_and_apply;

/// Bytes per page on every architecture this kernel supports.
pub const PAGE_SIZE: usize = 4096;

/// Start of the canonical kernel half of the address space on x86_64
/// (top of the higher half once sign-extended: `0xFFFF_FFFF_8000_0000`).
pub const VMA_KERNEL: u64 = 0xFFFF_FFFF_8000_0000;

/// Base virtual address of the direct map used to reach physical memory
/// from kernel code without walking page tables by hand.
pub const VMA_DIRECT_MAP: u64 = 0xFFFF_8000_0000_0000;

/// Base of the region reserved for the single-threaded task runner's stack
/// and TLS block. Sits just below the kernel image mapping, clear of the
/// direct map and the recursive self-map slot's range.
pub const VMA_TASK_RUNNER: u64 = 0xFFFF_FFFF_0000_0000;

/// PML4 index used for the recursive self-map (see `paging`).
pub const RECURSIVE_PML4_INDEX: usize = 510;

/// Number of scratch PML4-mapped temporary slots used to reach pages in a
/// foreign address space (`paging::map_temporary_physical_page`).
pub const TEMP_SLOT_COUNT: usize = 6;

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    /// True if this address lives in the canonical kernel half.
    pub const fn is_kernel(&self) -> bool {
        self.0 >= VMA_KERNEL || (self.0 >> 47) == 0x1_FFFF
    }

    /// Sign-extend bit 47 so the address is a canonical x86_64 pointer.
    pub const fn canonicalize(addr: u64) -> u64 {
        let shifted = (addr << 16) as i64;
        (shifted >> 16) as u64
    }
}

/// Page size options
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Small = 4096,
    Large = 2 * 1024 * 1024,
    Huge = 1024 * 1024 * 1024,
}

/// Page table entry flags, laid out to match the x86_64 PTE bit positions
/// used throughout `page_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(pub u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    /// Software-defined bit 9: page is "fixed" (MMIO, page-table frame,
    /// boot-reserved) and must never be returned to the frame allocator.
    pub const FIXED: Self = Self(1 << 9);
    pub const NO_EXECUTE: Self = Self(1 << 63);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_fixed(&self) -> bool {
        self.contains(Self::FIXED)
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for PageFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl core::ops::BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A raw physical memory span as reported by the bootloader's memory map
/// (BIOS/E820, UEFI, ...), before it is handed to the frame allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub usable: bool,
}

impl MemoryRegion {
    pub const fn new(start: u64, size: u64, usable: bool) -> Self {
        Self {
            start,
            size,
            usable,
        }
    }

    pub const fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Base virtual address the direct physical map begins at. Set once during
/// early boot by `bootloader::init_from_boot_info`.
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(VMA_DIRECT_MAP);

/// Convert a physical address to its kernel virtual alias in the direct map.
///
/// Used by code (the VAS fork path, temporary mapping helpers) that needs to
/// read or write a physical frame's contents without modifying the current
/// address space's own page tables.
pub fn phys_to_virt_addr(phys: u64) -> u64 {
    phys + PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// Physical address of the currently active top-level page table.
static KERNEL_PAGE_TABLE: AtomicU64 = AtomicU64::new(0);

pub fn set_kernel_page_table(phys_addr: u64) {
    KERNEL_PAGE_TABLE.store(phys_addr, Ordering::Release);
}

pub fn get_kernel_page_table() -> usize {
    phys_to_virt_addr(KERNEL_PAGE_TABLE.load(Ordering::Acquire)) as usize
}

/// Initialize memory management: bring up the frame allocator, the kernel's
/// own page tables and recursive self-map, and the kernel heap, in that
/// order since each later stage depends on the one before it.
pub fn init() {
    println!("[MM] Initializing memory management...");
    bootloader::init_from_boot_info();
    paging::init();
    if let Err(e) = heap::init() {
        println!("[MM] Warning: heap init failed: {e}");
    }
    println!("[MM] Memory management initialized");
}
