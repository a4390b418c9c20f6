//! Device drivers module
//!
//! Bus and storage/network drivers that back the filesystem and network
//! stack. Display, input and USB drivers live outside this crate's scope.

pub mod e1000;
pub mod network;
pub mod nvme;
pub mod pci;
pub mod storage;
pub mod virtio;
pub mod virtio_net;

pub use network::{EthernetDriver, LoopbackDriver, NetworkDevice};
pub use pci::{PciBus, PciDevice};
pub use storage::{AtaDriver, StorageDevice};

/// Initialize all drivers
pub fn init() {
    crate::println!("[DRIVERS] Initializing device drivers...");

    pci::init();
    network::init();
    storage::init();
    virtio::blk::init();

    crate::println!("[DRIVERS] Device drivers initialized");
}
