//! End-to-end tests for the network stack, exercised through the public
//! crate API rather than internal unit tests.

use exos_kernel::net::{
    self, arp, dhcp, device, ethernet, ip, socket, tcp, udp, IpAddress, Ipv4Address, MacAddress,
    SocketAddr,
};

fn init_stack() {
    let _ = net::init();
}

#[test]
fn ethernet_frame_round_trips() {
    let src = MacAddress([0x52, 0x54, 0x00, 0x00, 0x00, 0x01]);
    let dst = MacAddress([0x52, 0x54, 0x00, 0x00, 0x00, 0x02]);
    let payload = b"hello ethernet";

    let frame = ethernet::construct_frame(dst, src, ethernet::ETHERTYPE_ARP, payload);
    let parsed = ethernet::parse_frame(&frame).expect("frame should parse");

    assert_eq!(parsed.dst_mac, dst);
    assert_eq!(parsed.src_mac, src);
    assert_eq!(parsed.ethertype, ethernet::ETHERTYPE_ARP);
    assert_eq!(parsed.payload, payload);
}

#[test]
fn ipv4_header_checksum_round_trips() {
    let mut header = ip::Ipv4Header::new(
        Ipv4Address::new(10, 0, 0, 1),
        Ipv4Address::new(10, 0, 0, 2),
        ip::IpProtocol::Udp,
    );
    header.calculate_checksum();
    let bytes = header.to_bytes();

    assert!(ip::Ipv4Header::checksum_valid(&bytes));

    let (parsed, _offset) = ip::Ipv4Header::from_bytes(&bytes).expect("header should parse");
    assert_eq!(parsed.source, Ipv4Address::new(10, 0, 0, 1));
    assert_eq!(parsed.destination, Ipv4Address::new(10, 0, 0, 2));
}

#[test]
fn arp_cache_learns_from_observed_reply() {
    net::device_context::clear_device("arp-itest0");
    let sender_ip = Ipv4Address::new(192, 168, 1, 50);
    let sender_mac = MacAddress([0xAA; 6]);

    assert_eq!(arp::resolve("arp-itest0", sender_ip), arp::ArpLookup::Miss);

    let reply = build_arp_reply_packet(sender_mac, sender_ip, Ipv4Address::new(192, 168, 1, 1));
    arp::process_arp_packet("arp-itest0", &reply).expect("well-formed ARP reply should parse");

    assert_eq!(
        arp::resolve("arp-itest0", sender_ip),
        arp::ArpLookup::Hit(sender_mac)
    );
}

/// Hand-build a raw ARP reply packet (opcode 2) the way a peer on the wire
/// would send it, so the cache-learning path can be driven without reaching
/// into crate-private helpers.
fn build_arp_reply_packet(
    sender_mac: MacAddress,
    sender_ip: Ipv4Address,
    target_ip: Ipv4Address,
) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(28);
    pkt.extend_from_slice(&1u16.to_be_bytes()); // htype: Ethernet
    pkt.extend_from_slice(&0x0800u16.to_be_bytes()); // ptype: IPv4
    pkt.push(6); // hlen
    pkt.push(4); // plen
    pkt.extend_from_slice(&2u16.to_be_bytes()); // opcode: reply
    pkt.extend_from_slice(&sender_mac.0);
    pkt.extend_from_slice(&sender_ip.0);
    pkt.extend_from_slice(&MacAddress::BROADCAST.0);
    pkt.extend_from_slice(&target_ip.0);
    pkt
}

#[test]
fn udp_checksum_detects_corruption() {
    let src = IpAddress::V4(Ipv4Address::new(10, 0, 0, 1));
    let dst = IpAddress::V4(Ipv4Address::new(10, 0, 0, 2));
    let data = b"udp payload";

    let mut header = udp::UdpHeader::new(5000, 5001, data.len());
    header.calculate_checksum(src, dst, data);

    assert!(header.verify_checksum(src, dst, data));
    assert!(!header.verify_checksum(src, dst, b"corrupted!!"));
}

#[test]
fn tcp_connection_state_machine_transitions() {
    let local = SocketAddr::v4(Ipv4Address::LOCALHOST, 9001);
    let remote = SocketAddr::v4(Ipv4Address::new(192, 168, 1, 10), 80);

    let mut listener = tcp::TcpConnection::new(local, remote);
    assert_eq!(listener.state, tcp::TcpState::Closed);
    listener.listen().expect("listen should succeed");
    assert_eq!(listener.state, tcp::TcpState::Listen);

    let mut client = tcp::TcpConnection::new(local, remote);
    client.connect().expect("connect should succeed");
    assert_eq!(client.state, tcp::TcpState::SynSent);
}

#[test]
fn udp_socket_bind_then_send_requires_connect() {
    let mut sock = udp::UdpSocket::new();
    let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 6000);

    sock.bind(addr).expect("bind should succeed");
    assert!(sock.bound);
    assert_eq!(sock.local, addr);

    // send() with no connected peer must fail before any data leaves the socket.
    assert!(sock.send(b"no peer").is_err());
}

#[test]
fn dhcp_packet_round_trips_message_type() {
    let mac = MacAddress([0x52, 0x54, 0x00, 0xAB, 0xCD, 0xEF]);
    let mut pkt = dhcp::DhcpPacket::new(dhcp::DhcpMessageType::Discover, mac, 0x1234_5678);
    pkt.add_parameter_request_list();
    pkt.finalize();

    let bytes = pkt.to_bytes();
    let parsed = dhcp::DhcpPacket::from_bytes(&bytes).expect("dhcp packet should parse");

    assert_eq!(parsed.xid, 0x1234_5678);
    assert_eq!(
        parsed.get_message_type(),
        Some(dhcp::DhcpMessageType::Discover)
    );
}

#[test]
fn dhcp_client_starts_in_init_state() {
    let mac = MacAddress([0x52, 0x54, 0x00, 0x11, 0x22, 0x33]);
    let client = dhcp::DhcpClient::new("dhcp-itest0".into(), mac);
    assert_eq!(client.state(), dhcp::DhcpState::Init);
}

#[test]
fn device_registry_lists_loopback_after_init() {
    init_stack();
    let devices = device::list_devices();
    assert!(devices.iter().any(|name| name == "lo0"));
}

#[test]
fn socket_lifecycle_bind_listen_accept_rejects_unbound_accept() {
    init_stack();
    let _ = socket::init();

    let id = socket::create_socket(
        socket::SocketDomain::Inet,
        socket::SocketType::Stream,
        socket::SocketProtocol::Tcp,
    )
    .expect("socket creation should succeed");

    let sock = socket::get_socket_mut(id).expect("socket should exist");
    // A stream socket that hasn't been put into listening mode yet must
    // refuse accept() rather than silently blocking.
    assert!(sock.accept().is_err());
}
