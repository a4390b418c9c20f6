//! DHCP Client for Automatic Network Configuration (RFC 2131 / RFC 2132).
//!
//! One [`DhcpClient`] drives a single device through the full lease
//! lifecycle: `Init -> Selecting -> Requesting -> Bound`, then `Bound ->
//! Renewing` at T1 and `Renewing -> Rebinding` at T2 if no server answers,
//! falling back to `Init` when the lease finally expires. `Tick` is the
//! single entry point driving all of this: the network manager calls it
//! once per poll interval and it decides whether to resend, renew, rebind
//! or restart based on elapsed ticks.

use alloc::{string::String, vec::Vec};
use core::convert::TryInto;

use crate::{
    error::KernelError,
    net::{Ipv4Address, MacAddress},
};

/// DHCP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

/// DHCP operation codes
const DHCP_OP_BOOTREQUEST: u8 = 1;
#[allow(dead_code)] // DHCP protocol constant per RFC 2131
const DHCP_OP_BOOTREPLY: u8 = 2;

/// DHCP hardware types
const DHCP_HTYPE_ETHERNET: u8 = 1;

/// DHCP magic cookie
const DHCP_MAGIC_COOKIE: u32 = 0x63825363;

/// DHCP option codes
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS_SERVER: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAMETER_LIST: u8 = 55;
const OPT_RENEWAL_T1: u8 = 58;
const OPT_REBINDING_T2: u8 = 59;
const OPT_CLIENT_ID: u8 = 61;
const OPT_END: u8 = 255;

/// DHCP packet structure
#[repr(C)]
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// Operation code (1 = request, 2 = reply)
    pub op: u8,

    /// Hardware type (1 = Ethernet)
    pub htype: u8,

    /// Hardware address length
    pub hlen: u8,

    /// Hops
    pub hops: u8,

    /// Transaction ID
    pub xid: u32,

    /// Seconds elapsed
    pub secs: u16,

    /// Flags
    pub flags: u16,

    /// Client IP address
    pub ciaddr: Ipv4Address,

    /// Your (client) IP address
    pub yiaddr: Ipv4Address,

    /// Server IP address
    pub siaddr: Ipv4Address,

    /// Gateway IP address
    pub giaddr: Ipv4Address,

    /// Client hardware address (16 bytes)
    pub chaddr: [u8; 16],

    /// Server host name (64 bytes)
    pub sname: [u8; 64],

    /// Boot file name (128 bytes)
    pub file: [u8; 128],

    /// Options (variable length)
    pub options: Vec<u8>,
}

impl DhcpPacket {
    /// Create a new DHCP packet
    pub fn new(message_type: DhcpMessageType, mac_address: MacAddress, xid: u32) -> Self {
        let mut packet = Self {
            op: DHCP_OP_BOOTREQUEST,
            htype: DHCP_HTYPE_ETHERNET,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0x8000, // Broadcast flag
            ciaddr: Ipv4Address::UNSPECIFIED,
            yiaddr: Ipv4Address::UNSPECIFIED,
            siaddr: Ipv4Address::UNSPECIFIED,
            giaddr: Ipv4Address::UNSPECIFIED,
            chaddr: [0; 16],
            sname: [0; 64],
            file: [0; 128],
            options: Vec::new(),
        };

        packet.chaddr[0..6].copy_from_slice(&mac_address.0);
        packet.add_option_u32(DHCP_MAGIC_COOKIE);
        packet.add_option_u8(OPT_MESSAGE_TYPE, message_type as u8);
        packet.add_client_id(mac_address);

        packet
    }

    fn add_option_u8(&mut self, code: u8, value: u8) {
        self.options.push(code);
        self.options.push(1);
        self.options.push(value);
    }

    fn add_option_u32(&mut self, value: u32) {
        self.options.extend_from_slice(&value.to_be_bytes());
    }

    fn add_option_ipv4(&mut self, code: u8, addr: Ipv4Address) {
        self.options.push(code);
        self.options.push(4);
        self.options.extend_from_slice(&addr.0);
    }

    /// Option 61: client identifier, hardware-type-prefixed MAC (RFC 2132).
    fn add_client_id(&mut self, mac: MacAddress) {
        self.options.push(OPT_CLIENT_ID);
        self.options.push(7); // 1 byte htype + 6 byte MAC
        self.options.push(DHCP_HTYPE_ETHERNET);
        self.options.extend_from_slice(&mac.0);
    }

    /// Add parameter request list
    pub fn add_parameter_request_list(&mut self) {
        self.options.push(OPT_PARAMETER_LIST);
        self.options.push(5);
        self.options.push(OPT_SUBNET_MASK);
        self.options.push(OPT_ROUTER);
        self.options.push(OPT_DNS_SERVER);
        self.options.push(OPT_RENEWAL_T1);
        self.options.push(OPT_REBINDING_T2);
    }

    /// Finalize options
    pub fn finalize(&mut self) {
        self.options.push(OPT_END);
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(236 + self.options.len());

        bytes.push(self.op);
        bytes.push(self.htype);
        bytes.push(self.hlen);
        bytes.push(self.hops);
        bytes.extend_from_slice(&self.xid.to_be_bytes());
        bytes.extend_from_slice(&self.secs.to_be_bytes());
        bytes.extend_from_slice(&self.flags.to_be_bytes());
        bytes.extend_from_slice(&self.ciaddr.0);
        bytes.extend_from_slice(&self.yiaddr.0);
        bytes.extend_from_slice(&self.siaddr.0);
        bytes.extend_from_slice(&self.giaddr.0);
        bytes.extend_from_slice(&self.chaddr);
        bytes.extend_from_slice(&self.sname);
        bytes.extend_from_slice(&self.file);
        bytes.extend_from_slice(&self.options);

        bytes
    }

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < 236 {
            return Err(KernelError::InvalidArgument {
                name: "dhcp_packet_length",
                value: "too_short",
            });
        }

        let mut packet = Self {
            op: bytes[0],
            htype: bytes[1],
            hlen: bytes[2],
            hops: bytes[3],
            // The length check above guarantees every slice below is the
            // correct size, so these conversions cannot fail.
            xid: u32::from_be_bytes(bytes[4..8].try_into().expect("DHCP xid slice")),
            secs: u16::from_be_bytes(bytes[8..10].try_into().expect("DHCP secs slice")),
            flags: u16::from_be_bytes(bytes[10..12].try_into().expect("DHCP flags slice")),
            ciaddr: Ipv4Address(bytes[12..16].try_into().expect("DHCP ciaddr slice")),
            yiaddr: Ipv4Address(bytes[16..20].try_into().expect("DHCP yiaddr slice")),
            siaddr: Ipv4Address(bytes[20..24].try_into().expect("DHCP siaddr slice")),
            giaddr: Ipv4Address(bytes[24..28].try_into().expect("DHCP giaddr slice")),
            chaddr: bytes[28..44].try_into().expect("DHCP chaddr slice"),
            sname: bytes[44..108].try_into().expect("DHCP sname slice"),
            file: bytes[108..236].try_into().expect("DHCP file slice"),
            options: Vec::new(),
        };

        if bytes.len() > 236 {
            packet.options = bytes[236..].to_vec();
        }

        Ok(packet)
    }

    /// Get message type from options
    pub fn get_message_type(&self) -> Option<DhcpMessageType> {
        let mut i = 4; // Skip magic cookie

        while i < self.options.len() {
            let code = self.options[i];
            if code == OPT_END {
                break;
            }
            if i + 1 >= self.options.len() {
                break;
            }

            let len = self.options[i + 1] as usize;
            if code == OPT_MESSAGE_TYPE && len == 1 && i + 2 < self.options.len() {
                let msg_type = self.options[i + 2];
                return match msg_type {
                    1 => Some(DhcpMessageType::Discover),
                    2 => Some(DhcpMessageType::Offer),
                    3 => Some(DhcpMessageType::Request),
                    4 => Some(DhcpMessageType::Decline),
                    5 => Some(DhcpMessageType::Ack),
                    6 => Some(DhcpMessageType::Nak),
                    7 => Some(DhcpMessageType::Release),
                    8 => Some(DhcpMessageType::Inform),
                    _ => None,
                };
            }

            i += 2 + len;
        }

        None
    }
}

/// DHCP client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    /// Negotiation exhausted its retries without a server answering.
    Failed,
}

/// DHCP client configuration
#[derive(Debug, Clone)]
pub struct DhcpConfig {
    pub ip_address: Ipv4Address,
    pub subnet_mask: Ipv4Address,
    pub router: Option<Ipv4Address>,
    pub dns_servers: Vec<Ipv4Address>,
    pub lease_time: u32,
    pub server_id: Ipv4Address,
}

/// Base retransmission delay and shift cap for exponential backoff: delay
/// doubles each retry up to `BASE_RETRY_TICKS << MAX_BACKOFF_SHIFT`
/// (4s << 4 = 64s at roughly one tick per second).
const BASE_RETRY_TICKS: u32 = 4;
const MAX_BACKOFF_SHIFT: u32 = 4;
/// Give up and move to `Failed` after this many retransmissions.
const MAX_RETRIES: u32 = 8;

/// Static configuration applied to a device when DHCP negotiation gives up
/// (`DhcpState::Failed`), so the interface isn't left entirely unconfigured.
#[derive(Debug, Clone, Copy)]
pub struct StaticFallbackConfig {
    pub ip_address: Ipv4Address,
    pub subnet_mask: Ipv4Address,
    pub gateway: Option<Ipv4Address>,
}

/// DHCP client driving a single device's lease lifecycle.
pub struct DhcpClient {
    device_name: String,
    mac_address: MacAddress,
    state: DhcpState,
    xid: u32,
    config: Option<DhcpConfig>,
    /// Applied via `ip::set_interface_config` on entry to `Failed`.
    fallback: Option<StaticFallbackConfig>,

    /// Ticks until the next retransmission while Selecting/Requesting.
    retry_countdown: u32,
    /// Retransmissions sent in the current state, for backoff.
    retry_count: u32,

    /// Ticks elapsed since entering Bound, for T1/T2/lease-expiry tracking.
    elapsed_ticks: u32,
    t1_ticks: u32,
    t2_ticks: u32,
    lease_ticks: u32,
}

impl DhcpClient {
    /// Create a new DHCP client bound to `device_name`.
    pub fn new(device_name: String, mac_address: MacAddress) -> Self {
        Self {
            device_name,
            mac_address,
            state: DhcpState::Init,
            xid: Self::seed_xid(),
            config: None,
            fallback: None,
            retry_countdown: 0,
            retry_count: 0,
            elapsed_ticks: 0,
            t1_ticks: 0,
            t2_ticks: 0,
            lease_ticks: 0,
        }
    }

    /// Derive an initial transaction ID from the hardware timestamp counter,
    /// run through one step of a 64-bit LCG so two clients booted in the
    /// same tick don't collide on the raw counter value.
    fn seed_xid() -> u32 {
        let seed = crate::arch::entropy::read_timestamp()
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (seed >> 32) as u32
    }

    fn create_discover(&self) -> DhcpPacket {
        let mut packet = DhcpPacket::new(DhcpMessageType::Discover, self.mac_address, self.xid);
        packet.add_parameter_request_list();
        packet.finalize();
        packet
    }

    fn create_request(&self, offered_ip: Ipv4Address, server_id: Ipv4Address) -> DhcpPacket {
        let mut packet = DhcpPacket::new(DhcpMessageType::Request, self.mac_address, self.xid);
        packet.add_option_ipv4(OPT_REQUESTED_IP, offered_ip);
        packet.add_option_ipv4(OPT_SERVER_ID, server_id);
        packet.add_parameter_request_list();
        packet.finalize();
        packet
    }

    fn arm_retry(&mut self) {
        let shift = self.retry_count.min(MAX_BACKOFF_SHIFT);
        self.retry_countdown = BASE_RETRY_TICKS << shift;
    }

    /// Process DHCP OFFER -- parse options and transition to Requesting.
    fn process_offer(&mut self, packet: &DhcpPacket) -> Result<(), KernelError> {
        if self.state != DhcpState::Selecting {
            return Err(KernelError::InvalidState {
                expected: "Selecting",
                actual: "Other",
            });
        }

        let options = parse_dhcp_options(&packet.options);
        let offered_ip = packet.yiaddr;
        let server_id = options.server_id.unwrap_or(packet.siaddr);

        println!(
            "[DHCP] Received OFFER: {}.{}.{}.{} from server {}.{}.{}.{}",
            offered_ip.0[0],
            offered_ip.0[1],
            offered_ip.0[2],
            offered_ip.0[3],
            server_id.0[0],
            server_id.0[1],
            server_id.0[2],
            server_id.0[3],
        );

        let request = self.create_request(offered_ip, server_id);
        send_dhcp_packet(&self.device_name, &request.to_bytes());

        self.state = DhcpState::Requesting;
        self.retry_count = 0;
        self.arm_retry();
        Ok(())
    }

    /// Process DHCP ACK -- configure network interface with obtained
    /// parameters and start the lease timers.
    fn process_ack(&mut self, packet: &DhcpPacket) -> Result<(), KernelError> {
        if !matches!(
            self.state,
            DhcpState::Requesting | DhcpState::Renewing | DhcpState::Rebinding
        ) {
            return Err(KernelError::InvalidState {
                expected: "Requesting, Renewing or Rebinding",
                actual: "Other",
            });
        }

        let options = parse_dhcp_options(&packet.options);

        let ip = packet.yiaddr;
        let subnet = options
            .subnet_mask
            .unwrap_or(Ipv4Address::new(255, 255, 255, 0));
        let gateway = options.router;
        let lease = options.lease_time.unwrap_or(3600);
        // RFC 2131 defaults: T1 = 0.5 * lease, T2 = 0.875 * lease.
        let t1 = options.t1.unwrap_or(lease / 2);
        let t2 = options.t2.unwrap_or((lease * 7) / 8);

        let config = DhcpConfig {
            ip_address: ip,
            subnet_mask: subnet,
            router: gateway,
            dns_servers: options.dns_servers,
            lease_time: lease,
            server_id: options.server_id.unwrap_or(packet.siaddr),
        };

        println!(
            "[DHCP] ACK: IP {}.{}.{}.{} mask {}.{}.{}.{} lease {}s T1 {}s T2 {}s",
            ip.0[0], ip.0[1], ip.0[2], ip.0[3], subnet.0[0], subnet.0[1], subnet.0[2], subnet.0[3],
            lease, t1, t2,
        );

        super::ip::set_interface_config(&self.device_name, ip, subnet, gateway);
        super::arp::flush_cache(&self.device_name);

        self.config = Some(config);
        self.state = DhcpState::Bound;
        self.elapsed_ticks = 0;
        self.t1_ticks = t1;
        self.t2_ticks = t2;
        self.lease_ticks = lease;
        self.retry_count = 0;
        self.retry_countdown = 0;

        Ok(())
    }

    /// Process an incoming DHCP response packet.
    pub fn process_response(&mut self, data: &[u8]) -> Result<(), KernelError> {
        let packet = DhcpPacket::from_bytes(data)?;

        if packet.xid != self.xid {
            return Ok(()); // Not for us
        }

        match packet.get_message_type() {
            Some(DhcpMessageType::Offer) => self.process_offer(&packet),
            Some(DhcpMessageType::Ack) => self.process_ack(&packet),
            Some(DhcpMessageType::Nak) => {
                println!("[DHCP] Received NAK, restarting negotiation");
                self.state = DhcpState::Init;
                self.retry_count = 0;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    pub fn config(&self) -> Option<&DhcpConfig> {
        self.config.as_ref()
    }

    /// Set the static configuration to fall back to if negotiation fails.
    pub fn set_fallback(&mut self, fallback: StaticFallbackConfig) {
        self.fallback = Some(fallback);
    }

    /// Start DHCP negotiation -- sends DISCOVER via UDP broadcast.
    pub fn start(&mut self) -> Result<(), KernelError> {
        println!("[DHCP] Starting DHCP negotiation on {}", self.device_name);

        let discover = self.create_discover();
        send_dhcp_packet(&self.device_name, &discover.to_bytes());

        self.state = DhcpState::Selecting;
        self.retry_count = 0;
        self.arm_retry();
        Ok(())
    }

    /// Advance this client by one tick: resend on timeout during
    /// negotiation, and walk the Bound -> Renewing -> Rebinding -> Init
    /// lease lifecycle.
    pub fn tick(&mut self) {
        match self.state {
            DhcpState::Selecting | DhcpState::Requesting => {
                if self.retry_countdown == 0 {
                    return;
                }
                self.retry_countdown -= 1;
                if self.retry_countdown == 0 {
                    if self.retry_count >= MAX_RETRIES {
                        println!("[DHCP] Giving up on {} after {} retries", self.device_name, self.retry_count);
                        self.state = DhcpState::Failed;
                        if let Some(fallback) = self.fallback {
                            println!(
                                "[DHCP] Applying static fallback config on {}",
                                self.device_name
                            );
                            super::ip::set_interface_config(
                                &self.device_name,
                                fallback.ip_address,
                                fallback.subnet_mask,
                                fallback.gateway,
                            );
                        }
                        return;
                    }
                    self.retry_count += 1;
                    self.xid = self.xid.wrapping_add(1);
                    match self.state {
                        DhcpState::Selecting => {
                            let discover = self.create_discover();
                            send_dhcp_packet(&self.device_name, &discover.to_bytes());
                        }
                        DhcpState::Requesting => {
                            if let Some(cfg) = &self.config {
                                let request =
                                    self.create_request(cfg.ip_address, cfg.server_id);
                                send_dhcp_packet(&self.device_name, &request.to_bytes());
                            }
                        }
                        _ => unreachable!(),
                    }
                    self.arm_retry();
                }
            }
            DhcpState::Bound => {
                self.elapsed_ticks += 1;
                if self.elapsed_ticks >= self.lease_ticks {
                    println!("[DHCP] Lease expired on {}", self.device_name);
                    self.state = DhcpState::Init;
                    self.config = None;
                } else if self.elapsed_ticks >= self.t2_ticks {
                    self.state = DhcpState::Rebinding;
                    self.renew();
                } else if self.elapsed_ticks >= self.t1_ticks {
                    self.state = DhcpState::Renewing;
                    self.renew();
                }
            }
            DhcpState::Renewing | DhcpState::Rebinding => {
                self.elapsed_ticks += 1;
                if self.elapsed_ticks >= self.lease_ticks {
                    println!("[DHCP] Lease expired on {}", self.device_name);
                    self.state = DhcpState::Init;
                    self.config = None;
                } else if self.state == DhcpState::Renewing && self.elapsed_ticks >= self.t2_ticks
                {
                    self.state = DhcpState::Rebinding;
                    self.renew();
                }
            }
            DhcpState::Init | DhcpState::Failed => {}
        }
    }

    fn renew(&mut self) {
        if let Some(cfg) = &self.config {
            let request = self.create_request(cfg.ip_address, cfg.server_id);
            send_dhcp_packet(&self.device_name, &request.to_bytes());
        }
    }
}

/// Parsed DHCP options
#[derive(Debug, Default)]
struct ParsedDhcpOptions {
    subnet_mask: Option<Ipv4Address>,
    router: Option<Ipv4Address>,
    dns_servers: Vec<Ipv4Address>,
    lease_time: Option<u32>,
    server_id: Option<Ipv4Address>,
    t1: Option<u32>,
    t2: Option<u32>,
}

/// Parse DHCP options from the options byte array (after magic cookie).
fn parse_dhcp_options(options: &[u8]) -> ParsedDhcpOptions {
    let mut result = ParsedDhcpOptions::default();
    let mut i = 4; // Skip magic cookie (first 4 bytes)

    while i < options.len() {
        let code = options[i];
        if code == OPT_END {
            break;
        }
        if code == 0 {
            i += 1;
            continue;
        }
        if i + 1 >= options.len() {
            break;
        }
        let len = options[i + 1] as usize;
        if i + 2 + len > options.len() {
            break;
        }
        let data = &options[i + 2..i + 2 + len];

        match code {
            OPT_SUBNET_MASK if len == 4 => {
                result.subnet_mask = Some(Ipv4Address([data[0], data[1], data[2], data[3]]));
            }
            OPT_ROUTER if len >= 4 => {
                result.router = Some(Ipv4Address([data[0], data[1], data[2], data[3]]));
            }
            OPT_DNS_SERVER if len >= 4 => {
                for chunk in data.chunks_exact(4) {
                    result
                        .dns_servers
                        .push(Ipv4Address([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            OPT_LEASE_TIME if len == 4 => {
                result.lease_time = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            OPT_SERVER_ID if len == 4 => {
                result.server_id = Some(Ipv4Address([data[0], data[1], data[2], data[3]]));
            }
            OPT_RENEWAL_T1 if len == 4 => {
                result.t1 = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            OPT_REBINDING_T2 if len == 4 => {
                result.t2 = Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            }
            _ => {} // Unknown option (including 49/59/61 on replies we don't parse), skip
        }

        i += 2 + len;
    }

    result
}

/// Send a DHCP packet via UDP broadcast (0.0.0.0:68 -> 255.255.255.255:67).
fn send_dhcp_packet(device_name: &str, data: &[u8]) {
    let _ = device_name;
    let src = super::SocketAddr::v4(Ipv4Address::ANY, 68);
    let dst = super::SocketAddr::v4(Ipv4Address::BROADCAST, 67);
    let _ = super::udp::send_packet(src, dst, data);
}

/// Every device currently negotiating or holding a DHCP lease.
static DHCP_CLIENTS: spin::Mutex<Vec<DhcpClient>> = spin::Mutex::new(Vec::new());

/// Start DHCP on `device_name`.
pub fn start_dhcp(device_name: &str) -> Result<(), KernelError> {
    let mac = super::device::with_device(device_name, |dev| dev.mac_address())?;

    let mut clients = DHCP_CLIENTS.lock();
    if let Some(client) = clients.iter_mut().find(|c| c.device_name == device_name) {
        return client.start();
    }
    let mut client = DhcpClient::new(String::from(device_name), mac);
    let result = client.start();
    clients.push(client);
    result
}

/// Get current DHCP state for `device_name`, if negotiation has started.
pub fn get_dhcp_state(device_name: &str) -> Option<DhcpState> {
    DHCP_CLIENTS
        .lock()
        .iter()
        .find(|c| c.device_name == device_name)
        .map(|c| c.state())
}

/// Hand an incoming DHCP reply to the client negotiating on `device_name`.
pub fn process_response(device_name: &str, data: &[u8]) -> Result<(), KernelError> {
    let mut clients = DHCP_CLIENTS.lock();
    if let Some(client) = clients.iter_mut().find(|c| c.device_name == device_name) {
        client.process_response(data)
    } else {
        Ok(())
    }
}

/// Advance every device's DHCP client by one tick.
pub fn tick() {
    for client in DHCP_CLIENTS.lock().iter_mut() {
        client.tick();
    }
}

/// Initialize DHCP client subsystem.
pub fn init() -> Result<(), KernelError> {
    println!("[DHCP] DHCP client subsystem initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dhcp_packet_creation() {
        let mac = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let packet = DhcpPacket::new(DhcpMessageType::Discover, mac, 0x12345678);

        assert_eq!(packet.op, DHCP_OP_BOOTREQUEST);
        assert_eq!(packet.htype, DHCP_HTYPE_ETHERNET);
        assert_eq!(packet.hlen, 6);
    }

    #[test]
    fn test_dhcp_serialization() {
        let mac = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let mut packet = DhcpPacket::new(DhcpMessageType::Discover, mac, 0x12345678);
        packet.finalize();

        let bytes = packet.to_bytes();
        assert!(bytes.len() >= 236);
    }

    #[test]
    fn retry_backoff_caps_at_max_shift() {
        let mut client = DhcpClient::new(String::from("eth-test"), MacAddress::ZERO);
        client.retry_count = MAX_BACKOFF_SHIFT + 10;
        client.arm_retry();
        assert_eq!(client.retry_countdown, BASE_RETRY_TICKS << MAX_BACKOFF_SHIFT);
    }

    #[test]
    fn exhausting_retries_moves_to_failed() {
        let mut client = DhcpClient::new(String::from("eth-test2"), MacAddress::ZERO);
        client.state = DhcpState::Selecting;
        client.retry_count = MAX_RETRIES;
        client.retry_countdown = 1;
        client.tick();
        assert_eq!(client.state(), DhcpState::Failed);
    }
}
