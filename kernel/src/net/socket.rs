//! Berkeley-style socket API
//!
//! Sits above [`super::tcp`] and [`super::udp`], turning their protocol
//! state machines into the handle-based, non-blocking API system calls
//! expect: bind/listen/accept/connect/send/recv with a backlog queue for
//! pending TCP connections and a receive timeout option.

use alloc::{collections::BTreeMap, vec::Vec};

use spin::Mutex;

use super::{tcp::TcpConnection, IpAddress, SocketAddr};
use crate::error::KernelError;

/// Socket domain (address family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDomain {
    /// IPv4 Internet protocols
    Inet,
    /// IPv6 Internet protocols
    Inet6,
    /// Unix domain sockets
    Unix,
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Stream socket (TCP)
    Stream,
    /// Datagram socket (UDP)
    Dgram,
    /// Raw socket
    Raw,
}

/// Socket protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    /// Default protocol for socket type
    Default,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Bound,
    Listening,
    Connected,
    Closed,
}

/// Socket options
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub reuse_addr: bool,
    pub reuse_port: bool,
    pub broadcast: bool,
    pub keepalive: bool,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    /// SO_RCVTIMEO: how long `recv`/`recv_from` may report `WouldBlock`
    /// before giving up and returning a `Timeout` error. `None` means
    /// `recv` never times out -- it just returns `WouldBlock` immediately
    /// since this stack has no blocking wait primitive at this layer.
    pub recv_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_addr: false,
            reuse_port: false,
            broadcast: false,
            keepalive: false,
            recv_buffer_size: 65536,
            send_buffer_size: 65536,
            recv_timeout_ms: None,
            send_timeout_ms: None,
        }
    }
}

/// An inbound SYN waiting in a listening socket's backlog.
struct PendingConnection {
    remote: SocketAddr,
    initial_seq: u32,
}

/// Per-listening-socket backlog of not-yet-accepted connections.
static PENDING: Mutex<BTreeMap<usize, (usize, Vec<PendingConnection>)>> =
    Mutex::new(BTreeMap::new());

/// Queue an inbound SYN for whichever listening socket owns `local`'s port.
///
/// Called by [`super::tcp::process_packet`] when a SYN arrives that
/// doesn't match an existing connection. Silently drops the SYN if no
/// socket is listening on that port or the backlog is full -- the peer's
/// own retransmit timer will try again.
pub fn queue_pending_connection(
    local: SocketAddr,
    remote: SocketAddr,
    initial_seq: u32,
) -> Result<(), KernelError> {
    let listening_id = unsafe {
        SOCKET_TABLE.as_ref().and_then(|table| {
            table
                .iter()
                .find(|s| {
                    s.state == SocketState::Listening
                        && s.local_addr.map(|a| a.port()) == Some(local.port())
                })
                .map(|s| s.id)
        })
    };

    let Some(id) = listening_id else {
        return Err(KernelError::NotFound {
            resource: "listening_socket",
            id: 0,
        });
    };

    let mut pending = PENDING.lock();
    let entry = pending.entry(id).or_insert_with(|| (16, Vec::new()));
    if entry.1.iter().any(|p| p.remote == remote) {
        return Ok(()); // already queued, peer retransmitted the SYN
    }
    if entry.1.len() >= entry.0 {
        return Err(KernelError::ResourceExhausted {
            resource: "tcp_accept_backlog",
        });
    }
    entry.1.push(PendingConnection { remote, initial_seq });
    Ok(())
}

/// Which half(s) of a connection `shutdown` closes, mirroring Berkeley
/// `SHUT_RD`/`SHUT_WR`/`SHUT_RDWR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownHow {
    Read,
    Write,
    Both,
}

/// Generic socket handle
#[derive(Debug, Clone)]
pub struct Socket {
    pub id: usize,
    pub domain: SocketDomain,
    pub socket_type: SocketType,
    pub protocol: SocketProtocol,
    pub state: SocketState,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub options: SocketOptions,
    /// Set by `shutdown(Read | Both)`: further `recv`/`recv_from` calls
    /// report EOF (`Ok(0)`) instead of reaching into the protocol layer.
    shutdown_read: bool,
    /// `SO_RCVTIMEO` bookkeeping: uptime (ms) of the first `recv` poll that
    /// found no data since the last successful delivery. Cleared whenever
    /// `recv` actually returns bytes.
    recv_timeout_start_ms: Option<u64>,
}

impl Socket {
    /// Create a new socket
    pub fn new(
        domain: SocketDomain,
        socket_type: SocketType,
        protocol: SocketProtocol,
    ) -> Result<Self, KernelError> {
        // Validate domain/type/protocol combination
        match (domain, socket_type, protocol) {
            (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp)
            | (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Raw, _) => {}
            _ => {
                return Err(KernelError::InvalidArgument {
                    name: "socket_combination",
                    value: "unsupported",
                })
            }
        }

        Ok(Self {
            id: 0, // Will be assigned by socket table
            domain,
            socket_type,
            protocol,
            state: SocketState::Unbound,
            local_addr: None,
            remote_addr: None,
            options: SocketOptions::default(),
            shutdown_read: false,
            recv_timeout_start_ms: None,
        })
    }

    /// Bind socket to local address
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        if self.state != SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "unbound",
                actual: "already_bound",
            });
        }

        if !self.options.reuse_addr && port_in_use(addr.port(), self.socket_type) {
            return Err(KernelError::AlreadyExists {
                resource: "socket_port",
                id: addr.port() as u64,
            });
        }

        if self.socket_type == SocketType::Dgram && addr.port() != 0 {
            // A UDP socket bound to a port claims that port capacity on
            // every device it might receive traffic through.
            let devices = super::device::list_devices();
            let mut bound_any = devices.is_empty();
            for device in &devices {
                if super::udp::bind_port(device, addr.port()).is_ok() {
                    bound_any = true;
                }
            }
            if !bound_any {
                return Err(KernelError::ResourceExhausted {
                    resource: "udp_bindings",
                });
            }
            super::udp::register_socket(self.id, addr);
        }

        self.local_addr = Some(addr);
        self.state = SocketState::Bound;
        Ok(())
    }

    /// Listen for connections (TCP only)
    pub fn listen(&mut self, backlog: usize) -> Result<(), KernelError> {
        if self.socket_type != SocketType::Stream {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_stream",
            });
        }

        if self.state != SocketState::Bound {
            return Err(KernelError::InvalidState {
                expected: "bound",
                actual: "not_bound",
            });
        }

        let local = self.local_addr.unwrap();
        let mut connection = TcpConnection::new(local, SocketAddr::v4(super::Ipv4Address::ANY, 0));
        connection.listen()?;
        super::tcp::register_connection(self.id, connection);

        PENDING
            .lock()
            .insert(self.id, (backlog.max(1), Vec::new()));

        self.state = SocketState::Listening;
        Ok(())
    }

    /// Accept the next queued connection, or `WouldBlock` if none are
    /// pending. Non-blocking: callers that want to wait poll in a loop.
    pub fn accept(&self) -> Result<(Socket, SocketAddr), KernelError> {
        if self.socket_type != SocketType::Stream {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_stream",
            });
        }

        if self.state != SocketState::Listening {
            return Err(KernelError::InvalidState {
                expected: "listening",
                actual: "not_listening",
            });
        }

        let next = {
            let mut pending = PENDING.lock();
            let entry = pending.get_mut(&self.id);
            entry.and_then(|(_, queue)| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
        };

        let Some(pending) = next else {
            return Err(KernelError::WouldBlock);
        };

        let local = self.local_addr.unwrap();
        let connection =
            TcpConnection::accept_from_listener(local, pending.remote, pending.initial_seq)?;

        let id = allocate_socket_id();
        super::tcp::register_connection(id, connection);

        let accepted = Socket {
            id,
            domain: self.domain,
            socket_type: SocketType::Stream,
            protocol: SocketProtocol::Tcp,
            state: SocketState::Connected,
            local_addr: Some(local),
            remote_addr: Some(pending.remote),
            options: SocketOptions::default(),
            shutdown_read: false,
            recv_timeout_start_ms: None,
        };
        register_socket(accepted.clone());

        Ok((accepted, pending.remote))
    }

    /// Connect to remote address
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        match self.state {
            SocketState::Unbound | SocketState::Bound => {}
            _ => {
                return Err(KernelError::InvalidState {
                    expected: "unbound_or_bound",
                    actual: "other",
                })
            }
        }

        // Auto-bind if not bound
        if self.state == SocketState::Unbound {
            let local_addr = match addr.ip() {
                IpAddress::V4(_) => SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0),
                IpAddress::V6(_) => {
                    return Err(KernelError::NotImplemented {
                        feature: "ipv6_auto_bind",
                    })
                }
            };
            self.bind(local_addr)?;
        }

        if self.socket_type == SocketType::Stream {
            let local = self.local_addr.unwrap();
            let mut connection = TcpConnection::new(local, addr);
            connection.connect()?;
            super::tcp::register_connection(self.id, connection);
        }

        self.remote_addr = Some(addr);
        self.state = SocketState::Connected;

        Ok(())
    }

    /// Send data
    pub fn send(&self, data: &[u8], _flags: u32) -> Result<usize, KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::NotConnected);
        }

        let remote = self.remote_addr.ok_or(KernelError::NotConnected)?;

        match self.socket_type {
            SocketType::Stream => super::tcp::transmit_data(self.id, data),
            SocketType::Dgram => super::udp::UdpSocket::new().send_to(data, remote),
            SocketType::Raw => Err(KernelError::NotImplemented {
                feature: "raw_socket_send",
            }),
        }
    }

    /// Send data to specific address (UDP)
    pub fn send_to(&self, data: &[u8], dest: SocketAddr, _flags: u32) -> Result<usize, KernelError> {
        if self.socket_type != SocketType::Dgram {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_dgram",
            });
        }

        let mut socket = super::udp::UdpSocket::new();
        if let Some(local) = self.local_addr {
            socket.local = local;
        }
        socket.send_to(data, dest)
    }

    /// Receive data. Non-blocking: returns `WouldBlock` rather than
    /// waiting if nothing has arrived yet and `SO_RCVTIMEO` isn't set. If
    /// `SO_RCVTIMEO` is set, the first poll that finds no data records a
    /// start time (`recv_timeout_start_ms`); once `recv_timeout_ms` has
    /// elapsed without any bytes delivered, `recv` returns `Timeout`
    /// instead of continuing to report `WouldBlock`. Any call that
    /// delivers at least one byte clears the recorded start time.
    pub fn recv(&mut self, buffer: &mut [u8], flags: u32) -> Result<usize, KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::NotConnected);
        }

        if self.shutdown_read {
            return Ok(0);
        }

        let result = match self.socket_type {
            SocketType::Stream => super::tcp::receive_data(self.id, buffer),
            SocketType::Dgram => self.recv_from(buffer, flags).map(|(n, _from)| n),
            SocketType::Raw => Err(KernelError::NotImplemented {
                feature: "raw_socket_recv",
            }),
        };

        match result {
            Ok(n) if n > 0 => {
                self.recv_timeout_start_ms = None;
                Ok(n)
            }
            Ok(n) => self.check_recv_timeout().map(|()| n),
            Err(KernelError::WouldBlock) => {
                self.check_recv_timeout()?;
                Err(KernelError::WouldBlock)
            }
            Err(e) => Err(e),
        }
    }

    /// Update `recv_timeout_start_ms` for a poll that found no data, and
    /// return `Timeout` once `SO_RCVTIMEO` has elapsed since the first such
    /// poll. A no-op (`Ok(())`) when `SO_RCVTIMEO` isn't set.
    fn check_recv_timeout(&mut self) -> Result<(), KernelError> {
        let Some(timeout_ms) = self.options.recv_timeout_ms else {
            return Ok(());
        };

        let now = crate::timer::get_uptime_ms();
        let start = *self.recv_timeout_start_ms.get_or_insert(now);
        if now.saturating_sub(start) >= timeout_ms {
            self.recv_timeout_start_ms = None;
            Err(KernelError::Timeout {
                operation: "socket_recv",
                duration_ms: timeout_ms,
            })
        } else {
            Ok(())
        }
    }

    /// Receive data with source address
    pub fn recv_from(
        &self,
        buffer: &mut [u8],
        _flags: u32,
    ) -> Result<(usize, SocketAddr), KernelError> {
        if self.state == SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "bound",
                actual: "unbound",
            });
        }

        super::udp::receive_from(self.id, buffer)
    }

    /// Close socket
    pub fn close(&mut self) -> Result<(), KernelError> {
        match self.socket_type {
            SocketType::Stream => super::tcp::close_connection(self.id),
            SocketType::Dgram => {
                if let Some(local) = self.local_addr {
                    super::udp::unregister_socket(self.id);
                    for device in super::device::list_devices() {
                        super::udp::unbind_port(&device, local.port());
                    }
                }
            }
            SocketType::Raw => {}
        }

        PENDING.lock().remove(&self.id);
        self.state = SocketState::Closed;
        Ok(())
    }

    /// Set socket option
    pub fn set_option(&mut self, option: SocketOption) -> Result<(), KernelError> {
        match option {
            SocketOption::ReuseAddr(val) => self.options.reuse_addr = val,
            SocketOption::ReusePort(val) => self.options.reuse_port = val,
            SocketOption::Broadcast(val) => self.options.broadcast = val,
            SocketOption::KeepAlive(val) => self.options.keepalive = val,
            SocketOption::RecvBufferSize(val) => self.options.recv_buffer_size = val,
            SocketOption::SendBufferSize(val) => self.options.send_buffer_size = val,
            SocketOption::RecvTimeout(val) => self.options.recv_timeout_ms = val,
            SocketOption::SendTimeout(val) => self.options.send_timeout_ms = val,
        }
        Ok(())
    }

    /// Get socket option
    pub fn get_option(&self, kind: SocketOptionKind) -> SocketOption {
        match kind {
            SocketOptionKind::ReuseAddr => SocketOption::ReuseAddr(self.options.reuse_addr),
            SocketOptionKind::ReusePort => SocketOption::ReusePort(self.options.reuse_port),
            SocketOptionKind::Broadcast => SocketOption::Broadcast(self.options.broadcast),
            SocketOptionKind::KeepAlive => SocketOption::KeepAlive(self.options.keepalive),
            SocketOptionKind::RecvBufferSize => {
                SocketOption::RecvBufferSize(self.options.recv_buffer_size)
            }
            SocketOptionKind::SendBufferSize => {
                SocketOption::SendBufferSize(self.options.send_buffer_size)
            }
            SocketOptionKind::RecvTimeout => SocketOption::RecvTimeout(self.options.recv_timeout_ms),
            SocketOptionKind::SendTimeout => SocketOption::SendTimeout(self.options.send_timeout_ms),
        }
    }

    /// Shut down part or all of a full-duplex connection (`SHUT_RD` /
    /// `SHUT_WR` / `SHUT_RDWR`). Shutting down the write half of a stream
    /// socket drives the TCP half-close (sends a FIN); shutting down the
    /// read half only suppresses further delivery to `recv` on this end,
    /// since incoming data for a stream socket is still drained by the
    /// connection's own state machine.
    pub fn shutdown(&mut self, how: ShutdownHow) -> Result<(), KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::NotConnected);
        }

        if matches!(how, ShutdownHow::Write | ShutdownHow::Both) && self.socket_type == SocketType::Stream {
            super::tcp::with_connection(self.id, |conn| conn.close())
                .ok_or(KernelError::NotConnected)??;
        }

        if matches!(how, ShutdownHow::Read | ShutdownHow::Both) {
            self.shutdown_read = true;
        }

        Ok(())
    }

    /// Address of the peer this socket is connected to (`getpeername`).
    pub fn get_peer_name(&self) -> Result<SocketAddr, KernelError> {
        self.remote_addr.ok_or(KernelError::NotConnected)
    }

    /// Local address this socket is bound to (`getsockname`).
    pub fn get_socket_name(&self) -> Result<SocketAddr, KernelError> {
        self.local_addr.ok_or(KernelError::InvalidState {
            expected: "bound",
            actual: "unbound",
        })
    }
}

/// Socket option values
#[derive(Debug, Clone)]
pub enum SocketOption {
    ReuseAddr(bool),
    ReusePort(bool),
    Broadcast(bool),
    KeepAlive(bool),
    RecvBufferSize(usize),
    SendBufferSize(usize),
    /// SO_RCVTIMEO in milliseconds; `None` disables the timeout.
    RecvTimeout(Option<u64>),
    SendTimeout(Option<u64>),
}

/// Selects which option `Socket::get_option` reads back, without needing a
/// dummy payload the way re-using `SocketOption` for a getter would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOptionKind {
    ReuseAddr,
    ReusePort,
    Broadcast,
    KeepAlive,
    RecvBufferSize,
    SendBufferSize,
    RecvTimeout,
    SendTimeout,
}

/// Socket table for managing all sockets
static mut SOCKET_TABLE: Option<Vec<Socket>> = None;
static mut NEXT_SOCKET_ID: usize = 1;

fn allocate_socket_id() -> usize {
    unsafe {
        let id = NEXT_SOCKET_ID;
        NEXT_SOCKET_ID += 1;
        id
    }
}

fn port_in_use(port: u16, socket_type: SocketType) -> bool {
    unsafe {
        SOCKET_TABLE.as_ref().is_some_and(|table| {
            table.iter().any(|s| {
                s.socket_type == socket_type
                    && s.state != SocketState::Closed
                    && s.local_addr.map(|a| a.port()) == Some(port)
            })
        })
    }
}

fn register_socket(socket: Socket) {
    unsafe {
        if let Some(ref mut table) = SOCKET_TABLE {
            table.push(socket);
        }
    }
}

/// Initialize socket subsystem
pub fn init() -> Result<(), KernelError> {
    println!("[SOCKET] Initializing socket subsystem...");

    unsafe {
        SOCKET_TABLE = Some(Vec::new());
    }

    println!("[SOCKET] Socket subsystem initialized");
    Ok(())
}

/// Create a new socket and return its ID
pub fn create_socket(
    domain: SocketDomain,
    socket_type: SocketType,
    protocol: SocketProtocol,
) -> Result<usize, KernelError> {
    let mut socket = Socket::new(domain, socket_type, protocol)?;
    let id = allocate_socket_id();
    socket.id = id;
    register_socket(socket);
    Ok(id)
}

/// Get socket by ID
pub fn get_socket(id: usize) -> Result<&'static Socket, KernelError> {
    unsafe {
        if let Some(ref table) = SOCKET_TABLE {
            table
                .iter()
                .find(|s| s.id == id)
                .ok_or(KernelError::InvalidArgument {
                    name: "socket_id",
                    value: "not_found",
                })
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

/// Get mutable socket by ID
pub fn get_socket_mut(id: usize) -> Result<&'static mut Socket, KernelError> {
    unsafe {
        if let Some(ref mut table) = SOCKET_TABLE {
            table
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(KernelError::InvalidArgument {
                    name: "socket_id",
                    value: "not_found",
                })
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test_case]
    fn test_socket_creation() {
        let socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        assert_eq!(socket.state, SocketState::Unbound);
        assert_eq!(socket.socket_type, SocketType::Stream);
    }

    #[test_case]
    fn test_socket_bind() {
        let mut socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);

        assert_eq!(socket.state, SocketState::Unbound);
        socket.bind(addr).unwrap();
        assert_eq!(socket.state, SocketState::Bound);
        assert_eq!(socket.local_addr, Some(addr));
    }

    #[test_case]
    fn accept_without_pending_connections_would_block() {
        let _ = init();
        let id = create_socket(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let socket = get_socket_mut(id).unwrap();
        socket.bind(SocketAddr::v4(Ipv4Address::LOCALHOST, 9000)).unwrap();
        socket.listen(4).unwrap();

        assert!(matches!(socket.accept(), Err(KernelError::WouldBlock)));
    }

    #[test_case]
    fn queueing_past_backlog_is_rejected() {
        let _ = init();
        let id = create_socket(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let local = SocketAddr::v4(Ipv4Address::LOCALHOST, 9001);
        let socket = get_socket_mut(id).unwrap();
        socket.bind(local).unwrap();
        socket.listen(1).unwrap();

        let remote_a = SocketAddr::v4(Ipv4Address::new(10, 0, 0, 1), 4000);
        let remote_b = SocketAddr::v4(Ipv4Address::new(10, 0, 0, 2), 4001);
        queue_pending_connection(local, remote_a, 1).unwrap();
        assert!(queue_pending_connection(local, remote_b, 2).is_err());
    }

    #[test_case]
    fn get_peer_name_fails_before_connect() {
        let socket =
            Socket::new(SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp).unwrap();
        assert!(matches!(
            socket.get_peer_name(),
            Err(KernelError::NotConnected)
        ));
    }

    #[test_case]
    fn get_socket_name_matches_bind() {
        let mut socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 8081);
        socket.bind(addr).unwrap();
        assert_eq!(socket.get_socket_name(), Ok(addr));
    }

    #[test_case]
    fn get_option_reflects_set_option() {
        let mut socket =
            Socket::new(SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp).unwrap();
        socket.set_option(SocketOption::RecvTimeout(Some(500))).unwrap();
        assert!(matches!(
            socket.get_option(SocketOptionKind::RecvTimeout),
            SocketOption::RecvTimeout(Some(500))
        ));
    }

    #[test_case]
    fn shutdown_read_makes_recv_report_eof() {
        let _ = init();
        let id = create_socket(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let socket = get_socket_mut(id).unwrap();
        socket.bind(SocketAddr::v4(Ipv4Address::LOCALHOST, 9002)).unwrap();
        socket.state = SocketState::Connected;
        socket.remote_addr = Some(SocketAddr::v4(Ipv4Address::new(10, 0, 0, 3), 4002));

        socket.shutdown(ShutdownHow::Read).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(socket.recv(&mut buf, 0), Ok(0));
    }
}
