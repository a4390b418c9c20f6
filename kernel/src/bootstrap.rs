//! Kernel boot sequence.
//!
//! Single-stage-per-subsystem bring-up: architecture, memory management,
//! device drivers, filesystem, network stack. Kept flat because nothing
//! here depends on a scheduler or process model any more.

use crate::{arch, drivers, error::KernelResult, fs, mm, net, println};

/// Run the full boot sequence and enter the idle loop.
pub fn run() -> ! {
    if let Err(e) = kernel_init() {
        // Panic is intentional: kernel_init failure during boot is unrecoverable.
        // No subsystems are available for graceful error handling at this point.
        panic!("Bootstrap failed: {:?}", e);
    }

    println!("[BOOTSTRAP] Boot sequence complete");
    println!("BOOTOK");

    arch::halt();
}

/// Multi-stage kernel initialization.
pub fn kernel_init() -> KernelResult<()> {
    println!("[BOOTSTRAP] Starting kernel initialization...");

    println!("[BOOTSTRAP] Stage 1: Hardware initialization");
    arch::init();
    println!("[BOOTSTRAP] Architecture initialized");

    println!("[BOOTSTRAP] Stage 2: Memory management");
    mm::init();
    println!("[BOOTSTRAP] Memory management initialized");

    println!("[BOOTSTRAP] Stage 3: Device drivers");
    drivers::init();
    println!("[BOOTSTRAP] Device drivers initialized");

    #[cfg(feature = "alloc")]
    {
        println!("[BOOTSTRAP] Stage 4: Filesystem");
        fs::init();
        println!("[BOOTSTRAP] Filesystem initialized");

        println!("[BOOTSTRAP] Stage 5: Network stack");
        net::init()?;
        println!("[BOOTSTRAP] Network stack initialized");
    }

    Ok(())
}
