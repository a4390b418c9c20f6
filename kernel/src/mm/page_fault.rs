//! Page Fault Handler Framework
//!
//! Provides infrastructure for handling page faults including demand paging,
//! copy-on-write, and stack growth. Architecture-specific trap handlers
//! construct a [`PageFaultInfo`] and delegate to [`handle_page_fault`].

#![allow(dead_code)]

#[cfg(feature = "alloc")]
extern crate alloc;

use crate::{
    error::KernelError,
    mm::{PageFlags, VirtualAddress, PAGE_SIZE},
};

/// Reason a page fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultReason {
    /// Page is not present in the page table.
    NotPresent,
    /// A protection violation was detected (e.g., access rights mismatch).
    ProtectionViolation,
    /// Write to a read-only page.
    WriteToReadOnly,
    /// Attempt to execute a page marked as no-execute.
    ExecuteNoExecute,
    /// User-mode code tried to access a kernel-only page.
    UserModeKernelAccess,
}

/// Information about a page fault collected by the architecture trap handler.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// The virtual address that caused the fault.
    pub faulting_address: u64,
    /// Why the fault occurred.
    pub reason: PageFaultReason,
    /// Whether the access was a write (true) or read (false).
    pub was_write: bool,
    /// Whether the fault occurred while executing in user mode.
    pub was_user_mode: bool,
    /// Instruction pointer at the time of the fault.
    pub instruction_pointer: u64,
}

/// Default stack guard region size (one page below the mapped stack).
const STACK_GUARD_SIZE: usize = PAGE_SIZE;

/// Maximum stack growth per fault (128 KiB).
const MAX_STACK_GROWTH: usize = 128 * 1024;

/// Main page fault handler.
///
/// A fault on a kernel-half address while a user PML4 is active means the
/// running address space simply hasn't picked up a kernel mapping created
/// after it was cloned (every kernel PML4 entry is supposed to be identical
/// across address spaces at any instant; this is the lazy path that keeps
/// that invariant true without broadcasting TLB shootdowns on every kernel
/// mapping change). Try [`resolve_kernel_page_fault`] first; anything else
/// is a real fault.
pub fn handle_page_fault(info: PageFaultInfo) -> Result<(), KernelError> {
    let vaddr = VirtualAddress::new(info.faulting_address);

    if !info.was_user_mode && vaddr.is_kernel() {
        if resolve_kernel_page_fault(vaddr)? {
            return Ok(());
        }
    }

    signal_segv(&info)
}

/// Mirror the missing PML4 (and, transitively, PDPT/PD/PT) entry for
/// `addr` from the authoritative kernel PML4 into the currently active one.
///
/// Returns `Ok(true)` if an entry was copied and the faulting instruction
/// should be retried, `Ok(false)` if the address was already up to date (so
/// the fault is real and must be reported), and `Err` if `addr` isn't a
/// kernel-half address at all.
pub fn resolve_kernel_page_fault(addr: VirtualAddress) -> Result<bool, KernelError> {
    if !addr.is_kernel() {
        return Err(KernelError::InvalidAddress {
            addr: addr.as_u64() as usize,
        });
    }

    let l4_index = super::page_table::PageTableIndex::new_truncate((addr.as_u64() >> 39) as u16);

    let authoritative = super::get_kernel_page_table() as *const super::page_table::PageTable;
    let authoritative = unsafe { &*authoritative };
    let authoritative_entry = authoritative[l4_index];

    if !authoritative_entry.is_present() {
        // The kernel itself has no mapping here either; this is a genuine fault.
        return Ok(false);
    }

    let active_phys = crate::arch::x86_64::mmu::read_cr3();
    let active = super::phys_to_virt_addr(active_phys.as_u64()) as *mut super::page_table::PageTable;
    let active = unsafe { &mut *active };

    if active[l4_index].is_present() {
        // Already mirrored; whatever faulted is below this level and real.
        return Ok(false);
    }

    active[l4_index] = authoritative_entry;
    crate::arch::x86_64::mmu::flush_tlb_address(addr.as_u64());
    Ok(true)
}

/// Deliver SIGSEGV-equivalent reporting for a fault that couldn't be
/// resolved. This kernel has no process/signal subsystem, so a user-mode
/// fault is reported as a permission error rather than delivered as a
/// signal.
fn signal_segv(info: &PageFaultInfo) -> Result<(), KernelError> {
    if info.was_user_mode {
        return Err(KernelError::PermissionDenied {
            operation: "user-mode access to unmapped or protected page",
        });
    }

    Err(KernelError::InvalidAddress {
        addr: info.faulting_address as usize,
    })
}

// ---------------------------------------------------------------------------
// Architecture-specific entry points
// ---------------------------------------------------------------------------

/// Build a [`PageFaultInfo`] from an x86_64 page fault error code and CR2.
///
/// Error code bits (from Intel SDM):
/// - Bit 0 (P):    0 = not-present, 1 = protection violation
/// - Bit 1 (W/R):  0 = read, 1 = write
/// - Bit 2 (U/S):  0 = supervisor, 1 = user
/// - Bit 4 (I/D):  1 = instruction fetch
#[cfg(target_arch = "x86_64")]
pub fn from_x86_64(error_code: u64, cr2: u64, rip: u64) -> PageFaultInfo {
    let not_present = (error_code & 1) == 0;
    let was_write = (error_code & 2) != 0;
    let was_user = (error_code & 4) != 0;
    let was_fetch = (error_code & 16) != 0;

    let reason = if not_present {
        PageFaultReason::NotPresent
    } else if was_fetch {
        PageFaultReason::ExecuteNoExecute
    } else if was_write {
        PageFaultReason::WriteToReadOnly
    } else if was_user {
        PageFaultReason::UserModeKernelAccess
    } else {
        PageFaultReason::ProtectionViolation
    };

    PageFaultInfo {
        faulting_address: cr2,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: rip,
    }
}

/// Build a [`PageFaultInfo`] from an AArch64 data/instruction abort.
///
/// `esr_el1` contains the ESR value and `far_el1` the faulting address.
/// ISS encoding for Data Abort (EC=0b100100/0b100101):
/// - Bit 6 (WnR): 0 = read, 1 = write
/// - Bits [5:0] (DFSC): fault status code
#[cfg(target_arch = "aarch64")]
pub fn from_aarch64(esr_el1: u64, far_el1: u64, elr_el1: u64) -> PageFaultInfo {
    let dfsc = (esr_el1 & 0x3F) as u8;
    let was_write = (esr_el1 & (1 << 6)) != 0;
    // EC field is bits [31:26]
    let ec = ((esr_el1 >> 26) & 0x3F) as u8;
    // If EC == 0b100100 the abort came from a lower EL (user mode)
    let was_user = ec == 0b100100;

    let reason = match dfsc & 0x0F {
        // Translation faults (levels 0-3)
        0x04..=0x07 => PageFaultReason::NotPresent,
        // Permission faults (levels 0-3)
        0x0C..=0x0F => {
            if was_write {
                PageFaultReason::WriteToReadOnly
            } else {
                PageFaultReason::ProtectionViolation
            }
        }
        _ => PageFaultReason::ProtectionViolation,
    };

    PageFaultInfo {
        faulting_address: far_el1,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: elr_el1,
    }
}

/// Build a [`PageFaultInfo`] from a RISC-V page fault trap.
///
/// RISC-V uses different exception codes for load, store, and instruction
/// page faults (causes 12, 13, 15 respectively).
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub fn from_riscv(cause: u64, stval: u64, sepc: u64) -> PageFaultInfo {
    let was_write = cause == 15; // Store/AMO page fault
    let was_fetch = cause == 12; // Instruction page fault
                                 // cause == 13 is load page fault

    // RISC-V does not encode present vs. permission in the cause alone;
    // the PTE must be inspected. Default to NotPresent and let the handler
    // check VAS mappings.
    let reason = if was_fetch {
        PageFaultReason::ExecuteNoExecute
    } else {
        PageFaultReason::NotPresent
    };

    // User-mode faults come from U-mode; the SPP bit of sstatus indicates
    // whether the previous privilege was S-mode. We conservatively mark all
    // page faults as user-mode here; the caller can refine using sstatus.
    PageFaultInfo {
        faulting_address: stval,
        reason,
        was_write,
        was_user_mode: true,
        instruction_pointer: sepc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_fault_reason_equality() {
        assert_eq!(PageFaultReason::NotPresent, PageFaultReason::NotPresent);
        assert_ne!(
            PageFaultReason::NotPresent,
            PageFaultReason::WriteToReadOnly
        );
    }

    #[test]
    fn test_page_fault_info_construction() {
        let info = PageFaultInfo {
            faulting_address: 0xDEAD_BEEF,
            reason: PageFaultReason::NotPresent,
            was_write: false,
            was_user_mode: true,
            instruction_pointer: 0x4010_0000,
        };
        assert_eq!(info.faulting_address, 0xDEAD_BEEF);
        assert!(!info.was_write);
        assert!(info.was_user_mode);
    }

    #[test]
    fn test_page_fault_info_write_fault() {
        let info = PageFaultInfo {
            faulting_address: 0x1000,
            reason: PageFaultReason::WriteToReadOnly,
            was_write: true,
            was_user_mode: true,
            instruction_pointer: 0x2000,
        };
        assert!(info.was_write);
        assert_eq!(info.reason, PageFaultReason::WriteToReadOnly);
    }

    #[test]
    fn test_page_fault_info_kernel_fault() {
        let info = PageFaultInfo {
            faulting_address: 0xFFFF_8000_0000_1000,
            reason: PageFaultReason::ProtectionViolation,
            was_write: false,
            was_user_mode: false,
            instruction_pointer: 0xFFFF_8000_0010_0000,
        };
        assert!(!info.was_user_mode);
    }
}
