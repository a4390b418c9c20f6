//! ARP (Address Resolution Protocol) implementation
//!
//! Each device gets its own cache of up to 32 resolved `IPv4 -> MAC`
//! mappings, held in the per-device [`device_context`] store rather than
//! one shared global table, so interfaces on different subnets never see
//! each other's entries.
//!
//! Entries age on ticks, not wall-clock time: [`tick`] is meant to be
//! driven roughly once a second by the network manager. It decrements
//! every live entry's remaining TTL and, while a resolution is still
//! outstanding, resends a probe every [`PROBE_INTERVAL_TICKS`] ticks.

use alloc::{collections::BTreeMap, vec::Vec};

use crate::{
    error::KernelError,
    net::{device, device_context, ethernet, Ipv4Address, MacAddress, Packet},
};

/// ARP hardware type: Ethernet
const ARP_HTYPE_ETHERNET: u16 = 1;
/// ARP protocol type: IPv4
const ARP_PTYPE_IPV4: u16 = 0x0800;
/// ARP operation: Request
const ARP_OP_REQUEST: u16 = 1;
/// ARP operation: Reply
const ARP_OP_REPLY: u16 = 2;
/// ARP header size for Ethernet/IPv4: 28 bytes
const ARP_PACKET_SIZE: usize = 28;

/// Maximum resolved entries cached per device.
const ARP_CACHE_CAPACITY: usize = 32;
/// Ticks an entry survives before it must be re-resolved (~10 min at 1 tick/s).
const ENTRY_TTL_TICKS: u32 = 600;
/// Ticks between probe retransmissions while a resolution is outstanding.
const PROBE_INTERVAL_TICKS: u32 = 3;

/// Result of a cache lookup, mirroring the hit/miss contract ARP resolution
/// is specified against: a hit hands back the MAC directly, a miss starts
/// (or continues) probing and tells the caller to queue the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpLookup {
    Hit(MacAddress),
    Miss,
}

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    mac: MacAddress,
    ttl: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingProbe {
    countdown: u32,
}

/// Per-device ARP state, attached lazily the first time a device is used.
struct ArpCache {
    entries: BTreeMap<Ipv4Address, ArpEntry>,
    pending: BTreeMap<Ipv4Address, PendingProbe>,
    local_ip: Ipv4Address,
}

impl ArpCache {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            pending: BTreeMap::new(),
            local_ip: Ipv4Address::UNSPECIFIED,
        }
    }
}

fn ensure_cache(device_name: &str) {
    if !device_context::has_context::<ArpCache>(device_name) {
        device_context::set_context(device_name, ArpCache::new());
    }
}

/// No global state to stand up; devices attach a cache on first use.
pub fn init() -> Result<(), KernelError> {
    Ok(())
}

/// Record the local IPv4 address a device should source ARP traffic from.
/// Called by the IP layer whenever a device's address configuration
/// changes (static assignment or a completed DHCP lease).
pub fn set_local_ip(device_name: &str, ip: Ipv4Address) {
    ensure_cache(device_name);
    device_context::with_context_mut::<ArpCache, ()>(device_name, |cache| {
        cache.local_ip = ip;
    });
}

/// Resolve `ip`'s MAC address on `device_name`.
///
/// On a miss, sends an ARP request (or leaves an existing probe running)
/// and returns [`ArpLookup::Miss`] so the caller can park the packet in its
/// pending queue until [`tick`] or an incoming reply resolves it.
pub fn resolve(device_name: &str, ip: Ipv4Address) -> ArpLookup {
    ensure_cache(device_name);

    let hit = device_context::with_context::<ArpCache, Option<MacAddress>>(device_name, |cache| {
        cache.entries.get(&ip).map(|e| e.mac)
    })
    .flatten();

    if let Some(mac) = hit {
        return ArpLookup::Hit(mac);
    }

    let already_probing = device_context::with_context::<ArpCache, bool>(device_name, |cache| {
        cache.pending.contains_key(&ip)
    })
    .unwrap_or(false);

    if !already_probing {
        send_arp_request(device_name, ip);
        device_context::with_context_mut::<ArpCache, ()>(device_name, |cache| {
            cache.pending.insert(
                ip,
                PendingProbe {
                    countdown: PROBE_INTERVAL_TICKS,
                },
            );
        });
    }

    ArpLookup::Miss
}

/// Advance every device's ARP cache by one tick.
pub fn tick() {
    for device_name in device::list_devices() {
        tick_device(&device_name);
    }
}

fn tick_device(device_name: &str) {
    if !device_context::has_context::<ArpCache>(device_name) {
        return;
    }

    let due_probes = device_context::with_context_mut::<ArpCache, Vec<Ipv4Address>>(
        device_name,
        |cache| {
            cache.entries.retain(|_, entry| {
                if entry.ttl == 0 {
                    false
                } else {
                    entry.ttl -= 1;
                    entry.ttl > 0
                }
            });

            let mut due = Vec::new();
            for (ip, probe) in cache.pending.iter_mut() {
                if probe.countdown == 0 {
                    due.push(*ip);
                    probe.countdown = PROBE_INTERVAL_TICKS;
                } else {
                    probe.countdown -= 1;
                }
            }
            due
        },
    )
    .unwrap_or_default();

    for ip in due_probes {
        send_arp_request(device_name, ip);
    }
}

/// Insert or refresh a resolved mapping, waking any caller waiting on it.
fn update_cache(device_name: &str, ip: Ipv4Address, mac: MacAddress) {
    ensure_cache(device_name);
    let resolved_pending =
        device_context::with_context_mut::<ArpCache, bool>(device_name, |cache| {
            if cache.entries.len() >= ARP_CACHE_CAPACITY && !cache.entries.contains_key(&ip) {
                evict_oldest(cache);
            }
            cache.entries.insert(
                ip,
                ArpEntry {
                    mac,
                    ttl: ENTRY_TTL_TICKS,
                },
            );
            cache.pending.remove(&ip).is_some()
        })
        .unwrap_or(false);

    if resolved_pending {
        super::ip::on_arp_resolved(device_name, ip);
    }
}

fn evict_oldest(cache: &mut ArpCache) {
    if let Some((&oldest_ip, _)) = cache.entries.iter().min_by_key(|(_, e)| e.ttl) {
        cache.entries.remove(&oldest_ip);
    }
}

/// Process an incoming ARP packet: learn the sender's mapping, and reply
/// if it's a request for our configured address.
pub fn process_arp_packet(device_name: &str, data: &[u8]) -> Result<(), KernelError> {
    if data.len() < ARP_PACKET_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "arp_packet",
            value: "too_short",
        });
    }

    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    let hlen = data[4];
    let plen = data[5];
    let operation = u16::from_be_bytes([data[6], data[7]]);

    if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
        return Err(KernelError::InvalidArgument {
            name: "arp_format",
            value: "unsupported",
        });
    }

    let mut sender_mac_bytes = [0u8; 6];
    sender_mac_bytes.copy_from_slice(&data[8..14]);
    let sender_mac = MacAddress(sender_mac_bytes);
    let sender_ip = Ipv4Address([data[14], data[15], data[16], data[17]]);
    let target_ip = Ipv4Address([data[24], data[25], data[26], data[27]]);

    update_cache(device_name, sender_ip, sender_mac);

    if operation == ARP_OP_REQUEST {
        let local_ip = device_context::with_context::<ArpCache, Ipv4Address>(device_name, |c| {
            c.local_ip
        })
        .unwrap_or(Ipv4Address::UNSPECIFIED);

        if local_ip != Ipv4Address::UNSPECIFIED && target_ip == local_ip {
            if let Ok(our_mac) = device::with_device(device_name, |d| d.mac_address()) {
                let reply = build_arp_reply(our_mac, local_ip, sender_mac, sender_ip);
                send_arp_frame(device_name, &reply, sender_mac);
            }
        }
    }

    Ok(())
}

/// Send an ARP request for `target_ip` on `device_name`.
fn send_arp_request(device_name: &str, target_ip: Ipv4Address) {
    let Ok(our_mac) = device::with_device(device_name, |d| d.mac_address()) else {
        return;
    };
    let our_ip = device_context::with_context::<ArpCache, Ipv4Address>(device_name, |c| {
        c.local_ip
    })
    .unwrap_or(Ipv4Address::UNSPECIFIED);

    let packet = build_arp_request(our_mac, our_ip, target_ip);
    send_arp_frame(device_name, &packet, MacAddress::BROADCAST);
}

/// Build a raw ARP request packet (28 bytes).
fn build_arp_request(
    sender_mac: MacAddress,
    sender_ip: Ipv4Address,
    target_ip: Ipv4Address,
) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(ARP_PACKET_SIZE);
    pkt.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    pkt.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    pkt.push(6);
    pkt.push(4);
    pkt.extend_from_slice(&ARP_OP_REQUEST.to_be_bytes());
    pkt.extend_from_slice(&sender_mac.0);
    pkt.extend_from_slice(&sender_ip.0);
    pkt.extend_from_slice(&[0u8; 6]);
    pkt.extend_from_slice(&target_ip.0);
    pkt
}

/// Build a raw ARP reply packet (28 bytes).
fn build_arp_reply(
    sender_mac: MacAddress,
    sender_ip: Ipv4Address,
    target_mac: MacAddress,
    target_ip: Ipv4Address,
) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(ARP_PACKET_SIZE);
    pkt.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    pkt.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    pkt.push(6);
    pkt.push(4);
    pkt.extend_from_slice(&ARP_OP_REPLY.to_be_bytes());
    pkt.extend_from_slice(&sender_mac.0);
    pkt.extend_from_slice(&sender_ip.0);
    pkt.extend_from_slice(&target_mac.0);
    pkt.extend_from_slice(&target_ip.0);
    pkt
}

/// Wrap an ARP packet in an Ethernet frame and transmit it on `device_name`.
fn send_arp_frame(device_name: &str, arp_data: &[u8], dst_mac: MacAddress) {
    let Ok(src_mac) = device::with_device(device_name, |d| d.mac_address()) else {
        return;
    };
    let frame = ethernet::construct_frame(dst_mac, src_mac, ethernet::ETHERTYPE_ARP, arp_data);
    let pkt = Packet::from_bytes(&frame);
    let _ = device::with_device_mut(device_name, |dev| dev.transmit(&pkt));
}

/// Snapshot of a device's resolved entries, for diagnostics.
pub fn get_cache_entries(device_name: &str) -> Vec<(Ipv4Address, MacAddress)> {
    device_context::with_context::<ArpCache, Vec<(Ipv4Address, MacAddress)>>(device_name, |c| {
        c.entries.iter().map(|(ip, e)| (*ip, e.mac)).collect()
    })
    .unwrap_or_default()
}

/// Discard every cached entry and pending probe for a device (link-down).
pub fn flush_cache(device_name: &str) {
    device_context::with_context_mut::<ArpCache, ()>(device_name, |cache| {
        cache.entries.clear();
        cache.pending.clear();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn miss_then_hit_after_learning() {
        device_context::clear_device("arp-test0");
        let ip = Ipv4Address::new(10, 0, 0, 5);
        assert_eq!(resolve("arp-test0", ip), ArpLookup::Miss);

        update_cache("arp-test0", ip, MacAddress([1, 2, 3, 4, 5, 6]));
        assert_eq!(
            resolve("arp-test0", ip),
            ArpLookup::Hit(MacAddress([1, 2, 3, 4, 5, 6]))
        );
    }

    #[test_case]
    fn entry_expires_after_ttl_ticks() {
        device_context::clear_device("arp-test1");
        let ip = Ipv4Address::new(10, 0, 0, 6);
        update_cache("arp-test1", ip, MacAddress([9; 6]));

        for _ in 0..ENTRY_TTL_TICKS {
            tick_device("arp-test1");
        }

        assert!(get_cache_entries("arp-test1").is_empty());
    }

    #[test_case]
    fn cache_capacity_evicts_oldest() {
        device_context::clear_device("arp-test2");
        for i in 0..(ARP_CACHE_CAPACITY as u8 + 1) {
            update_cache("arp-test2", Ipv4Address::new(10, 0, 0, i), MacAddress([i; 6]));
        }
        assert!(get_cache_entries("arp-test2").len() <= ARP_CACHE_CAPACITY);
    }

    #[test]
    fn arp_request_build_has_correct_opcode() {
        let sender_mac = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let sender_ip = Ipv4Address::new(10, 0, 2, 15);
        let target_ip = Ipv4Address::new(10, 0, 2, 1);

        let pkt = build_arp_request(sender_mac, sender_ip, target_ip);
        assert_eq!(pkt.len(), ARP_PACKET_SIZE);
        assert_eq!(u16::from_be_bytes([pkt[6], pkt[7]]), ARP_OP_REQUEST);
    }
}
