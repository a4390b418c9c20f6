//! Cooperative network polling task.
//!
//! No interrupt wakes this kernel when a packet arrives on a software
//! device, so something has to ask. This module registers a periodic
//! software timer (see [`crate::timer`]) that, roughly once a second,
//! drains every registered device's receive queue and ticks ARP, DHCP and
//! TCP so their retransmit/lease timers make progress.

use alloc::vec::Vec;

use crate::{
    error::KernelError,
    timer::{self, TimerId, TimerMode},
};

/// How often the poll callback fires.
const POLL_INTERVAL_MS: u64 = 1000;
/// Upper bound on packets drained from a single device per poll, so one
/// noisy device can't starve the others.
const MAX_PACKETS_PER_DEVICE_PER_POLL: usize = 64;

/// Start the cooperative polling task.
///
/// Safe to call more than once; a second call is a no-op (the software
/// timer wheel itself may already be initialized by another subsystem).
pub fn init() -> Result<(), KernelError> {
    let _ = timer::init();

    timer::create_timer(TimerMode::Periodic, POLL_INTERVAL_MS, poll_tick)?;
    println!("[NETMGR] Network manager polling every {}ms", POLL_INTERVAL_MS);
    Ok(())
}

/// Timer callback: drain device queues, then tick the protocols that need
/// wall-clock progress.
fn poll_tick(_id: TimerId) {
    poll_devices();

    super::arp::tick();
    super::dhcp::tick();
    super::tcp::tick();
}

/// Drain received packets from every registered device and dispatch them
/// through the Ethernet layer.
fn poll_devices() {
    let names: Vec<alloc::string::String> = super::device::list_devices();

    for name in names {
        for _ in 0..MAX_PACKETS_PER_DEVICE_PER_POLL {
            let received = super::device::with_device_mut(&name, |dev| dev.receive());
            let packet = match received {
                Ok(Ok(Some(packet))) => packet,
                _ => break,
            };

            let mac = match super::device::with_device(&name, |dev| dev.mac_address()) {
                Ok(mac) => mac,
                Err(_) => break,
            };

            if let Err(e) = super::ethernet::dispatch_frame(&name, packet.data(), &mac) {
                #[cfg(feature = "net_debug")]
                println!("[NETMGR] Dropping frame from {}: {:?}", name, e);
                let _ = e;
            }
        }
    }
}

/// Run one poll/tick cycle immediately, outside the timer schedule.
///
/// Useful for tests and for draining the stack right after bringing a
/// device up, without waiting for the next scheduled tick.
pub fn poll_once() {
    poll_tick(TimerId(0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn poll_once_does_not_panic_with_no_traffic() {
        poll_once();
    }
}
