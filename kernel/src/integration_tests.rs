//! Integration tests for inter-subsystem communication
//!
//! This module provides tests that verify proper interaction between
//! different kernel subsystems (filesystem and network stack).

#![cfg(test)]

use crate::{fs, net};

/// Test network packet creation and statistics
#[test_case]
fn test_network_packet_stats() {
    net::init().expect("Network init failed");

    // Get initial stats
    let stats_before = net::get_stats();

    // Simulate sending packets
    net::update_stats_tx(1500);
    net::update_stats_tx(1500);

    // Check stats updated
    let stats_after = net::get_stats();
    assert_eq!(stats_after.packets_sent, stats_before.packets_sent + 2);
    assert_eq!(stats_after.bytes_sent, stats_before.bytes_sent + 3000);
}

/// Test IP routing table
#[test_case]
fn test_ip_routing() {
    net::init().expect("Network init failed");

    // Test localhost routing
    let localhost = net::Ipv4Address::LOCALHOST;
    let route = net::ip::lookup_route(localhost);

    assert!(route.is_some(), "Should find route for localhost");

    let route = route.unwrap();
    assert_eq!(route.destination, net::Ipv4Address::new(127, 0, 0, 0));
    assert_eq!(route.netmask, net::Ipv4Address::new(255, 0, 0, 0));
}

/// Test TCP connection state transitions
#[test_case]
fn test_tcp_state_machine() {
    net::init().expect("Network init failed");

    let local = net::SocketAddr::v4(net::Ipv4Address::LOCALHOST, 8080);
    let remote = net::SocketAddr::v4(net::Ipv4Address::new(192, 168, 1, 1), 80);

    let mut conn = net::tcp::TcpConnection::new(local, remote);

    // Initial state should be Closed
    assert_eq!(conn.state, net::tcp::TcpState::Closed);

    // Test transition to Listen
    conn.listen().expect("Listen failed");
    assert_eq!(conn.state, net::tcp::TcpState::Listen);

    // Create another connection for active open
    let mut conn2 = net::tcp::TcpConnection::new(local, remote);
    conn2.connect().expect("Connect failed");
    assert_eq!(conn2.state, net::tcp::TcpState::SynSent);
}

/// Test UDP socket operations
#[test_case]
fn test_udp_socket_operations() {
    net::init().expect("Network init failed");

    let mut socket = net::udp::UdpSocket::new();
    let addr = net::SocketAddr::v4(net::Ipv4Address::LOCALHOST, 8080);

    // Test bind
    socket.bind(addr).expect("Bind failed");
    assert!(socket.bound);
    assert_eq!(socket.local, addr);

    // Test connect (optional for UDP)
    let remote = net::SocketAddr::v4(net::Ipv4Address::new(192, 168, 1, 1), 80);
    socket.connect(remote).expect("Connect failed");
    assert_eq!(socket.remote, Some(remote));
}

/// Test network device loopback
#[test_case]
fn test_loopback_device() {
    net::init().expect("Network init failed");

    // Loopback should be created and up
    let lo = net::device::get_device("lo0");
    assert!(lo.is_some(), "Loopback device should exist");

    let lo = lo.unwrap();
    assert_eq!(lo.name(), "lo0");
    assert_eq!(lo.state(), net::device::DeviceState::Up);
}

/// Test VFS mount operations
#[test_case]
fn test_vfs_operations() {
    fs::init();

    // Test root mount
    let result = fs::mount("/", "ramfs", 0);
    // Mount may succeed or be already mounted
    // Both are acceptable states
    let _ = result;
}

#[cfg(test)]
mod module_tests {
    use super::*;

    /// Run all integration tests
    pub fn run_all() {
        test_network_packet_stats();
        test_ip_routing();
        test_tcp_state_machine();
        test_udp_socket_operations();
        test_loopback_device();
        test_vfs_operations();

        crate::println!("[INTEGRATION] All integration tests passed!");
    }
}
