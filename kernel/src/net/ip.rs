//! IP layer implementation
//!
//! Handles IPv4 packet construction, parsing, routing and per-device
//! address configuration. ARP resolution gates outgoing packets: a `Send`
//! that cannot resolve its next hop immediately is parked in that device's
//! pending queue until [`on_arp_resolved`] drains it.

#![allow(static_mut_refs)]

use alloc::{string::String, vec::Vec};

use spin::Mutex;

use super::{device, device_context, ethernet, IpAddress, Ipv4Address, Packet};
use crate::error::KernelError;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

/// IPv4 header
#[derive(Debug, Clone)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
}

impl Ipv4Header {
    pub const MIN_SIZE: usize = 20;

    pub fn new(src: Ipv4Address, dst: Ipv4Address, protocol: IpProtocol) -> Self {
        Self {
            version: 4,
            ihl: 5, // 5 * 4 = 20 bytes
            tos: 0,
            total_length: 0,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: protocol as u8,
            checksum: 0,
            source: src,
            destination: dst,
        }
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];

        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        bytes[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.identification.to_be_bytes());
        bytes[6] = (self.flags << 5) | ((self.fragment_offset >> 8) as u8);
        bytes[7] = (self.fragment_offset & 0xFF) as u8;
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        bytes[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.source.0);
        bytes[16..20].copy_from_slice(&self.destination.0);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "ip_header",
                value: "too_short",
            });
        }

        let version = bytes[0] >> 4;
        if version != 4 {
            return Err(KernelError::InvalidArgument {
                name: "ip_version",
                value: "not_ipv4",
            });
        }

        let ihl = bytes[0] & 0x0F;
        if ihl < 5 {
            return Err(KernelError::InvalidArgument {
                name: "ip_ihl",
                value: "below_minimum",
            });
        }

        Ok(Self {
            version,
            ihl,
            tos: bytes[1],
            total_length: u16::from_be_bytes([bytes[2], bytes[3]]),
            identification: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: bytes[6] >> 5,
            fragment_offset: u16::from_be_bytes([bytes[6] & 0x1F, bytes[7]]),
            ttl: bytes[8],
            protocol: bytes[9],
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            source: Ipv4Address([bytes[12], bytes[13], bytes[14], bytes[15]]),
            destination: Ipv4Address([bytes[16], bytes[17], bytes[18], bytes[19]]),
        })
    }

    /// Calculate checksum over the 20-byte fixed header (options are not
    /// supported: `ihl` is always 5 on the packets this stack builds).
    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        let bytes = self.to_bytes();
        self.checksum = !checksum16(&bytes);
    }

    /// True if the header's own checksum is valid (zero is not special-cased
    /// for IP the way it is for UDP: a received packet with checksum 0 is
    /// simply a packet whose checksum happened to compute to zero).
    pub fn checksum_valid(bytes: &[u8]) -> bool {
        let ihl = (bytes[0] & 0x0F) as usize * 4;
        if bytes.len() < ihl {
            return false;
        }
        checksum16(&bytes[..ihl]) == 0xFFFF
    }
}

fn checksum16(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        sum += u16::from_be_bytes([bytes[i], bytes[i + 1]]) as u32;
        i += 2;
    }
    if i < bytes.len() {
        sum += (bytes[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Routing table entry: which device owns traffic to `destination/netmask`.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub destination: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Option<Ipv4Address>,
    pub device: String,
}

static ROUTES: Mutex<Vec<RouteEntry>> = Mutex::new(Vec::new());

pub fn add_route(entry: RouteEntry) {
    ROUTES.lock().push(entry);
}

pub fn lookup_route(dest: Ipv4Address) -> Option<RouteEntry> {
    let routes = ROUTES.lock();
    routes
        .iter()
        .filter(|r| dest.to_u32() & r.netmask.to_u32() == r.destination.to_u32() & r.netmask.to_u32())
        .max_by_key(|r| r.netmask.to_u32())
        .cloned()
}

/// Per-device IPv4 configuration: address, netmask and default gateway.
#[derive(Debug, Clone, Copy)]
struct DeviceIpConfig {
    local_ip: Ipv4Address,
    netmask: Ipv4Address,
    gateway: Option<Ipv4Address>,
}

impl Default for DeviceIpConfig {
    fn default() -> Self {
        Self {
            local_ip: Ipv4Address::UNSPECIFIED,
            netmask: Ipv4Address::new(255, 255, 255, 0),
            gateway: None,
        }
    }
}

/// Configure (or reconfigure) a device's IPv4 address. Called for static
/// assignment and by the DHCP client once a lease is bound.
pub fn set_interface_config(
    device_name: &str,
    ip: Ipv4Address,
    netmask: Ipv4Address,
    gateway: Option<Ipv4Address>,
) {
    device_context::set_context(
        device_name,
        DeviceIpConfig {
            local_ip: ip,
            netmask,
            gateway,
        },
    );
    super::arp::set_local_ip(device_name, ip);

    add_route(RouteEntry {
        destination: Ipv4Address::from_u32(ip.to_u32() & netmask.to_u32()),
        netmask,
        gateway: None,
        device: String::from(device_name),
    });
    if let Some(gw) = gateway {
        add_route(RouteEntry {
            destination: Ipv4Address::UNSPECIFIED,
            netmask: Ipv4Address::UNSPECIFIED,
            gateway: Some(gw),
            device: String::from(device_name),
        });
    }
}

/// The address currently configured on `device_name`, or `0.0.0.0` if none.
pub fn get_interface_ip(device_name: &str) -> Ipv4Address {
    device_context::with_context::<DeviceIpConfig, Ipv4Address>(device_name, |c| c.local_ip)
        .unwrap_or(Ipv4Address::UNSPECIFIED)
}

fn interface_config(device_name: &str) -> DeviceIpConfig {
    device_context::with_context::<DeviceIpConfig, DeviceIpConfig>(device_name, |c| *c)
        .unwrap_or_default()
}

/// Handler registered against a single IP protocol number.
pub type ProtocolHandler =
    fn(device_name: &str, src: IpAddress, dst: IpAddress, payload: &[u8]) -> Result<(), KernelError>;

/// One slot per possible IP protocol number (0-255).
static PROTOCOL_HANDLERS: Mutex<[Option<ProtocolHandler>; 256]> = Mutex::new([None; 256]);

/// Register the handler invoked for `protocol` by [`on_ethernet_frame`].
/// Registering a second handler for the same protocol replaces the first.
pub fn register_protocol_handler(protocol: IpProtocol, handler: ProtocolHandler) {
    PROTOCOL_HANDLERS.lock()[protocol as usize] = Some(handler);
}

/// Outcome of a [`send`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// The next hop's MAC was already cached; the frame went out immediately.
    Immediate,
    /// The next hop required ARP resolution; the packet was queued and will
    /// be flushed by [`on_arp_resolved`].
    Pending,
    /// No route, no device, or the pending queue for this next hop is full.
    Failed,
}

/// Per-device queue of packets waiting on ARP resolution, keyed by next hop.
struct PendingQueue {
    entries: Vec<(Ipv4Address, Vec<u8>)>,
}

impl PendingQueue {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

/// Maximum packets a device may have parked awaiting ARP resolution at once.
const PENDING_QUEUE_CAPACITY: usize = 16;

fn ensure_queue(device_name: &str) {
    if !device_context::has_context::<PendingQueue>(device_name) {
        device_context::set_context(device_name, PendingQueue::new());
    }
}

/// Build and send an IPv4 packet for `protocol` to `dest`, routing it to
/// whichever device owns the matching route and resolving the next hop's
/// MAC address via ARP.
pub fn send(dest: IpAddress, protocol: IpProtocol, data: &[u8]) -> Result<SendResult, KernelError> {
    let dest_v4 = match dest {
        IpAddress::V4(addr) => addr,
        IpAddress::V6(_) => {
            return Err(KernelError::NotImplemented {
                feature: "ipv6_send",
            })
        }
    };

    let route = lookup_route(dest_v4).ok_or(KernelError::NotFound {
        resource: "ip_route",
        id: 0,
    })?;
    let device_name = route.device.clone();
    let config = interface_config(&device_name);

    let mut header = Ipv4Header::new(config.local_ip, dest_v4, protocol);
    header.total_length = (Ipv4Header::MIN_SIZE + data.len()) as u16;
    header.calculate_checksum();

    let mut packet = Vec::with_capacity(header.total_length as usize);
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(data);

    let subnet_broadcast = Ipv4Address::from_u32(
        (config.local_ip.to_u32() & config.netmask.to_u32()) | !config.netmask.to_u32(),
    );
    let broadcast = dest_v4 == Ipv4Address::BROADCAST || dest_v4 == subnet_broadcast;

    if broadcast {
        transmit_ethernet(&device_name, super::MacAddress::BROADCAST, &packet)?;
        super::update_stats_tx(packet.len());
        return Ok(SendResult::Immediate);
    }

    let same_subnet = dest_v4.to_u32() & config.netmask.to_u32()
        == config.local_ip.to_u32() & config.netmask.to_u32();
    let next_hop = if same_subnet {
        Some(dest_v4)
    } else {
        route.gateway.or(config.gateway)
    };

    let Some(next_hop) = next_hop else {
        return Ok(SendResult::Failed);
    };

    match super::arp::resolve(&device_name, next_hop) {
        super::arp::ArpLookup::Hit(mac) => {
            transmit_ethernet(&device_name, mac, &packet)?;
            super::update_stats_tx(packet.len());
            Ok(SendResult::Immediate)
        }
        super::arp::ArpLookup::Miss => {
            ensure_queue(&device_name);
            let queued = device_context::with_context_mut::<PendingQueue, bool>(
                &device_name,
                |q| {
                    if q.entries.len() >= PENDING_QUEUE_CAPACITY {
                        false
                    } else {
                        q.entries.push((next_hop, packet.clone()));
                        true
                    }
                },
            )
            .unwrap_or(false);

            if queued {
                Ok(SendResult::Pending)
            } else {
                Ok(SendResult::Failed)
            }
        }
    }
}

fn transmit_ethernet(
    device_name: &str,
    dest_mac: super::MacAddress,
    ip_packet: &[u8],
) -> Result<(), KernelError> {
    let src_mac = device::with_device(device_name, |d| d.mac_address())?;
    let frame = ethernet::construct_frame(dest_mac, src_mac, ethernet::ETHERTYPE_IPV4, ip_packet);
    let pkt = Packet::from_bytes(&frame);
    device::with_device_mut(device_name, |d| d.transmit(&pkt))?
}

/// Drain every packet on `device_name` waiting on `next_hop`, now that ARP
/// has resolved it. Called by the ARP cache the moment a pending entry's
/// reply comes in.
pub fn on_arp_resolved(device_name: &str, next_hop: Ipv4Address) {
    ensure_queue(device_name);
    let ready = device_context::with_context_mut::<PendingQueue, Vec<Vec<u8>>>(
        device_name,
        |q| {
            let mut ready = Vec::new();
            q.entries.retain(|(hop, packet)| {
                if *hop == next_hop {
                    ready.push(packet.clone());
                    false
                } else {
                    true
                }
            });
            ready
        },
    )
    .unwrap_or_default();

    if ready.is_empty() {
        return;
    }

    let mac = match super::arp::resolve(device_name, next_hop) {
        super::arp::ArpLookup::Hit(mac) => mac,
        super::arp::ArpLookup::Miss => return,
    };

    for packet in ready {
        let _ = transmit_ethernet(device_name, mac, &packet);
        super::update_stats_tx(packet.len());
    }
}

/// Handle a received IPv4 packet: validate the header, then dispatch to
/// whichever handler is registered for its protocol number.
pub fn on_ethernet_frame(device_name: &str, data: &[u8]) -> Result<(), KernelError> {
    if data.len() < Ipv4Header::MIN_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "ip_packet",
            value: "too_short",
        });
    }

    let header = Ipv4Header::from_bytes(data)?;
    let header_len = header.ihl as usize * 4;
    if data.len() < header_len || (header.total_length as usize) > data.len() {
        return Err(KernelError::InvalidArgument {
            name: "ip_packet",
            value: "length_mismatch",
        });
    }
    if !Ipv4Header::checksum_valid(&data[..header_len]) {
        return Err(KernelError::InvalidArgument {
            name: "ip_packet",
            value: "bad_checksum",
        });
    }

    super::update_stats_rx(data.len());

    let handler = PROTOCOL_HANDLERS.lock()[header.protocol as usize];
    if let Some(handler) = handler {
        let src = IpAddress::V4(header.source);
        let dst = IpAddress::V4(header.destination);
        let payload = &data[header_len..header.total_length as usize];
        handler(device_name, src, dst, payload)?;
    }

    Ok(())
}

/// Initialize IP layer
pub fn init() -> Result<(), KernelError> {
    println!("[IP] Initializing IP layer...");

    add_route(RouteEntry {
        destination: Ipv4Address::new(127, 0, 0, 0),
        netmask: Ipv4Address::new(255, 0, 0, 0),
        gateway: None,
        device: String::from("lo0"),
    });

    register_protocol_handler(IpProtocol::Tcp, |_device, src, dst, payload| {
        super::tcp::process_packet(src, dst, payload)
    });
    register_protocol_handler(IpProtocol::Udp, |device, src, dst, payload| {
        super::udp::process_packet(device, src, dst, payload)
    });

    println!("[IP] IP layer initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_ipv4_header() {
        let src = Ipv4Address::new(192, 168, 1, 1);
        let dst = Ipv4Address::new(192, 168, 1, 2);
        let header = Ipv4Header::new(src, dst, IpProtocol::Tcp);

        assert_eq!(header.version, 4);
        assert_eq!(header.protocol, 6);
        assert_eq!(header.source, src);
        assert_eq!(header.destination, dst);
    }

    #[test_case]
    fn test_ipv4_header_roundtrip() {
        let src = Ipv4Address::new(10, 0, 0, 1);
        let dst = Ipv4Address::new(10, 0, 0, 2);
        let mut header = Ipv4Header::new(src, dst, IpProtocol::Udp);
        header.calculate_checksum();

        let bytes = header.to_bytes();
        let parsed = Ipv4Header::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.source, src);
        assert_eq!(parsed.destination, dst);
        assert_eq!(parsed.protocol, 17);
        assert!(Ipv4Header::checksum_valid(&bytes));
    }

    #[test_case]
    fn route_lookup_prefers_longest_prefix() {
        let routes_before = ROUTES.lock().len();
        add_route(RouteEntry {
            destination: Ipv4Address::new(10, 0, 0, 0),
            netmask: Ipv4Address::new(255, 0, 0, 0),
            gateway: None,
            device: String::from("eth0"),
        });
        add_route(RouteEntry {
            destination: Ipv4Address::new(10, 0, 0, 0),
            netmask: Ipv4Address::new(255, 255, 255, 0),
            gateway: None,
            device: String::from("eth1"),
        });
        let found = lookup_route(Ipv4Address::new(10, 0, 0, 5)).unwrap();
        assert_eq!(found.device, "eth1");
        assert!(ROUTES.lock().len() >= routes_before + 2);
    }

    #[test_case]
    fn interface_config_round_trips_through_device_context() {
        device_context::clear_device("ip-test0");
        set_interface_config(
            "ip-test0",
            Ipv4Address::new(192, 168, 1, 50),
            Ipv4Address::new(255, 255, 255, 0),
            Some(Ipv4Address::new(192, 168, 1, 1)),
        );
        assert_eq!(get_interface_ip("ip-test0"), Ipv4Address::new(192, 168, 1, 50));
    }
}
