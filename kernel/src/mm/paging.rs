//! Recursive self-map and the temporary-slot mechanism used to reach pages
//! that live in an address space other than the one currently active.
//!
//! PML4 entry [`RECURSIVE_PML4_INDEX`] (510) of every address space this
//! kernel builds points back at that address space's own PML4 frame. Walking
//! through that entry N times before the final level lands on the Nth-level
//! table itself, which is the standard x86_64 recursive-paging trick and is
//! what [`pt_addr`]/[`pd_addr`]/[`pdpt_addr`] compute. This is independent
//! of (and a complement to) the direct physical map in `mm::phys_to_virt_addr`:
//! the direct map is a same-address-space convenience, the recursive slot is
//! the literal mechanism the fast walker and the kernel page-fault resolver
//! use to edit arbitrary levels of the *currently active* PML4 without first
//! mapping anything.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{
    page_table::{PageTable, PageTableIndex},
    PageFlags, VirtualAddress, FRAME_ALLOCATOR, PAGE_SIZE, RECURSIVE_PML4_INDEX, TEMP_SLOT_COUNT,
};

const R: u64 = RECURSIVE_PML4_INDEX as u64;

fn sign_extend(raw: u64) -> u64 {
    VirtualAddress::canonicalize(raw << 12)
}

/// Virtual address of the currently active PML4, reached through its own
/// recursive slot.
pub fn pml4_addr() -> VirtualAddress {
    VirtualAddress::new(sign_extend((R << 27) | (R << 18) | (R << 9) | R))
}

/// Virtual address of the PDPT backing `addr`'s PML4 entry.
pub fn pdpt_addr(addr: VirtualAddress) -> VirtualAddress {
    let l4 = (addr.as_u64() >> 39) & 0x1FF;
    VirtualAddress::new(sign_extend((R << 27) | (R << 18) | (R << 9) | l4))
}

/// Virtual address of the PD backing `addr`'s PDPT entry.
pub fn pd_addr(addr: VirtualAddress) -> VirtualAddress {
    let l4 = (addr.as_u64() >> 39) & 0x1FF;
    let l3 = (addr.as_u64() >> 30) & 0x1FF;
    VirtualAddress::new(sign_extend((R << 27) | (R << 18) | (l4 << 9) | l3))
}

/// Virtual address of the PT backing `addr`'s PD entry.
pub fn pt_addr(addr: VirtualAddress) -> VirtualAddress {
    let l4 = (addr.as_u64() >> 39) & 0x1FF;
    let l3 = (addr.as_u64() >> 30) & 0x1FF;
    let l2 = (addr.as_u64() >> 21) & 0x1FF;
    VirtualAddress::new(sign_extend((R << 27) | (l4 << 18) | (l3 << 9) | l2))
}

fn pml4_table() -> &'static mut PageTable {
    unsafe { &mut *(pml4_addr().as_u64() as *mut PageTable) }
}

/// Install the recursive self-map entry in the running kernel PML4. Called
/// once early in boot after the kernel's own page tables are active.
pub fn init() {
    let cr3 = crate::arch::x86_64::mmu::read_cr3();
    let pml4_phys = cr3.as_u64();

    let pml4_virt = super::phys_to_virt_addr(pml4_phys) as *mut PageTable;
    let table = unsafe { &mut *pml4_virt };
    let entry = &mut table[PageTableIndex::new_truncate(RECURSIVE_PML4_INDEX as u16)];
    entry.set_addr(
        super::PhysicalAddress::new(pml4_phys),
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::FIXED,
    );

    init_temp_slots();
}

/// Base virtual address of the temporary-slot window. Chosen just below the
/// task-runner region so it never collides with the kernel image, the
/// direct map, or the recursive slot's own address range.
const TEMP_SLOTS_BASE: u64 = super::VMA_TASK_RUNNER - (TEMP_SLOT_COUNT as u64 + 1) * PAGE_SIZE as u64;

fn temp_slot_addr(slot: usize) -> VirtualAddress {
    VirtualAddress::new(TEMP_SLOTS_BASE + (slot as u64) * PAGE_SIZE as u64)
}

static TEMP_SLOT_LOCK: Mutex<()> = Mutex::new(());
static TEMP_SLOT_OWNER: [AtomicU64; TEMP_SLOT_COUNT] = [const { AtomicU64::new(0) }; TEMP_SLOT_COUNT];

/// Pre-allocate the PDPT/PD/PT chain backing the temp-slot window so that
/// later calls to `map_temporary_physical_page` only ever touch leaf PTEs
/// and never need to allocate (and thus never need to re-enter the frame
/// allocator while a fault is already being resolved).
fn init_temp_slots() {
    for slot in 0..TEMP_SLOT_COUNT {
        let addr = temp_slot_addr(slot);
        ensure_leaf_entry(addr);
    }
}

/// Walk the recursive self-map down to the PT entry for `addr`, allocating
/// any missing PDPT/PD/PT frames along the way. Returns without mapping a
/// frame into the final PTE; the caller fills that in.
fn ensure_leaf_entry(addr: VirtualAddress) {
    let l4_index = PageTableIndex::new_truncate((addr.as_u64() >> 39) as u16);
    let l3_index = PageTableIndex::new_truncate((addr.as_u64() >> 30) as u16);
    let l2_index = PageTableIndex::new_truncate((addr.as_u64() >> 21) as u16);

    let l4 = pml4_table();
    if !l4[l4_index].is_present() {
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .expect("out of memory allocating PDPT for temp slot window");
        l4[l4_index].set(frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::FIXED);
        // The newly-linked PDPT is reached through the recursive slot once
        // linked above; zero it via that same path.
        zero_table(pdpt_addr(addr));
    }

    let l3 = unsafe { &mut *(pdpt_addr(addr).as_u64() as *mut PageTable) };
    if !l3[l3_index].is_present() {
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .expect("out of memory allocating PD for temp slot window");
        l3[l3_index].set(frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::FIXED);
        zero_table(pd_addr(addr));
    }

    let l2 = unsafe { &mut *(pd_addr(addr).as_u64() as *mut PageTable) };
    if !l2[l2_index].is_present() {
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .expect("out of memory allocating PT for temp slot window");
        l2[l2_index].set(frame, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::FIXED);
        zero_table(pt_addr(addr));
    }
}

fn zero_table(virt: VirtualAddress) {
    let table = unsafe { &mut *(virt.as_u64() as *mut PageTable) };
    table.zero();
}

fn leaf_entry(addr: VirtualAddress) -> &'static mut super::page_table::PageTableEntry {
    let l1_index = PageTableIndex::new_truncate((addr.as_u64() >> 12) as u16);
    let table = unsafe { &mut *(pt_addr(addr).as_u64() as *mut PageTable) };
    &mut table[l1_index]
}

/// Map `phys` into temporary slot `slot` (0..[`TEMP_SLOT_COUNT`]) of the
/// currently active address space and return the virtual address it is now
/// reachable at. Used to read or write one page belonging to another,
/// inactive address space (fork, exec, page-in) without switching CR3.
///
/// # Safety
/// The caller must own the returned mapping exclusively; call
/// `unmap_temporary_physical_page` with the same slot before reusing it.
pub unsafe fn map_temporary_physical_page(slot: usize, phys: super::PhysicalAddress) -> VirtualAddress {
    assert!(slot < TEMP_SLOT_COUNT, "temp slot index out of range");
    let _guard = TEMP_SLOT_LOCK.lock();
    let addr = temp_slot_addr(slot);
    let entry = leaf_entry(addr);
    entry.set_addr(phys, PageFlags::PRESENT | PageFlags::WRITABLE);
    TEMP_SLOT_OWNER[slot].store(phys.as_u64(), Ordering::Release);
    crate::arch::x86_64::mmu::flush_tlb_address(addr.as_u64());
    addr
}

/// Tear down the mapping installed by `map_temporary_physical_page`.
pub fn unmap_temporary_physical_page(slot: usize) {
    assert!(slot < TEMP_SLOT_COUNT, "temp slot index out of range");
    let _guard = TEMP_SLOT_LOCK.lock();
    let addr = temp_slot_addr(slot);
    let entry = leaf_entry(addr);
    entry.clear();
    TEMP_SLOT_OWNER[slot].store(0, Ordering::Release);
    crate::arch::x86_64::mmu::flush_tlb_address(addr.as_u64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_addr_distinguishes_adjacent_pages() {
        let a = VirtualAddress::new(0x1000);
        let b = VirtualAddress::new(0x2000);
        assert_eq!(pt_addr(a), pt_addr(b));
        let c = VirtualAddress::new(0x20_0000);
        assert_ne!(pt_addr(a), pt_addr(c));
    }

    #[test]
    fn pdpt_addr_changes_across_l4_boundary() {
        let a = VirtualAddress::new(0);
        let b = VirtualAddress::new(1u64 << 39);
        assert_ne!(pdpt_addr(a), pdpt_addr(b));
    }
}
