//! TCP protocol implementation (RFC 793).
//!
//! Each connection is a full control block: separate send/receive sequence
//! spaces (`SND.NXT`/`SND.UNA`/`RCV.NXT`), byte-ring send/receive buffers,
//! a retransmit timer covering the oldest unacknowledged segment, and a
//! TIME_WAIT timer for the 2MSL-style teardown delay. [`tick`] drives both
//! timers; it is meant to be called roughly once a second by the network
//! manager.

use alloc::{collections::BTreeMap, vec::Vec};

use spin::Mutex;

use super::{ip::IpProtocol, IpAddress, SocketAddr};
use crate::error::KernelError;

/// TCP header flags
#[derive(Debug, Clone, Copy)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }
}

/// TCP connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Fixed 20-byte TCP header (no options).
#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
    pub window: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    pub const SIZE: usize = 20;
    const DATA_OFFSET_WORDS: u8 = 5; // 20 bytes / 4, no options

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut b = [0u8; 20];
        b[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        b[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        b[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        b[8..12].copy_from_slice(&self.ack_num.to_be_bytes());
        b[12] = Self::DATA_OFFSET_WORDS << 4;
        b[13] = self.flags;
        b[14..16].copy_from_slice(&self.window.to_be_bytes());
        b[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        b[18..20].copy_from_slice(&self.urgent_ptr.to_be_bytes());
        b
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), KernelError> {
        if bytes.len() < Self::SIZE {
            return Err(KernelError::InvalidArgument {
                name: "tcp_header",
                value: "too_short",
            });
        }
        let data_offset = ((bytes[12] >> 4) as usize) * 4;
        if data_offset < Self::SIZE || data_offset > bytes.len() {
            return Err(KernelError::InvalidArgument {
                name: "tcp_data_offset",
                value: "out_of_range",
            });
        }
        Ok((
            Self {
                src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
                dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
                seq_num: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                ack_num: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
                flags: bytes[13],
                window: u16::from_be_bytes([bytes[14], bytes[15]]),
                checksum: u16::from_be_bytes([bytes[16], bytes[17]]),
                urgent_ptr: u16::from_be_bytes([bytes[18], bytes[19]]),
            },
            data_offset,
        ))
    }

    /// Pseudo-header checksum per RFC 793: src IP, dst IP, zero byte,
    /// protocol (6), TCP segment length, then the segment itself.
    pub fn calculate_checksum(&mut self, src: IpAddress, dst: IpAddress, payload: &[u8]) {
        self.checksum = 0;
        let (IpAddress::V4(src_v4), IpAddress::V4(dst_v4)) = (src, dst) else {
            return;
        };

        let segment_len = (Self::SIZE + payload.len()) as u16;
        let mut pseudo = Vec::with_capacity(12 + Self::SIZE + payload.len());
        pseudo.extend_from_slice(&src_v4.0);
        pseudo.extend_from_slice(&dst_v4.0);
        pseudo.push(0);
        pseudo.push(IpProtocol::Tcp as u8);
        pseudo.extend_from_slice(&segment_len.to_be_bytes());
        pseudo.extend_from_slice(&self.to_bytes());
        pseudo.extend_from_slice(payload);

        self.checksum = !checksum16(&pseudo);
    }

    pub fn verify_checksum(&self, src: IpAddress, dst: IpAddress, payload: &[u8]) -> bool {
        let mut copy = *self;
        copy.calculate_checksum(src, dst, payload);
        copy.checksum == self.checksum
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

/// Default maximum segment size this stack transmits.
const TCP_MSS: usize = 1460;
/// Send buffer capacity per connection.
const TCP_SEND_BUFFER_CAPACITY: usize = 8 * 1024;
/// Receive buffer capacity per connection.
const TCP_RECV_BUFFER_CAPACITY: usize = 32 * 1024;
/// Ticks before an unacknowledged segment is retransmitted.
const TCP_RETRANSMIT_TIMEOUT_TICKS: u32 = 3;
/// Retransmissions attempted before the connection is reset.
const TCP_MAX_RETRANSMITS: u32 = 5;
/// Ticks spent in TIME_WAIT before the connection is reclaimed.
const TCP_TIME_WAIT_TIMEOUT_TICKS: u32 = 60;

/// The most recently sent segment still awaiting acknowledgment, kept so
/// the retransmit timer can resend exactly what went out.
struct RetransmitEntry {
    seq: u32,
    flags: u8,
    payload: Vec<u8>,
    ticks_remaining: u32,
    retries: u32,
}

/// Full TCP connection control block.
pub struct TcpConnection {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,

    send_next: u32,
    send_unacked: u32,
    send_window: u16,
    send_buffer: Vec<u8>,

    recv_next: u32,
    recv_buffer: Vec<u8>,
    advertised_window: u16,

    retransmit: Option<RetransmitEntry>,
    time_wait_ticks: Option<u32>,
}

impl TcpConnection {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            state: TcpState::Closed,
            send_next: 0,
            send_unacked: 0,
            send_window: u16::MAX,
            send_buffer: Vec::new(),
            recv_next: 0,
            recv_buffer: Vec::new(),
            advertised_window: TCP_RECV_BUFFER_CAPACITY as u16,
            retransmit: None,
            time_wait_ticks: None,
        }
    }

    /// Window hysteresis (silly window avoidance): only grow the
    /// advertised window once at least half a segment or half the buffer
    /// has freed up, rather than announcing every single byte consumed.
    fn recv_window_advertisement(&self) -> u16 {
        let free = TCP_RECV_BUFFER_CAPACITY.saturating_sub(self.recv_buffer.len());
        let threshold = (TCP_MSS / 2).min(TCP_RECV_BUFFER_CAPACITY / 2);
        if free == 0 || free == TCP_RECV_BUFFER_CAPACITY {
            free as u16
        } else if free >= self.advertised_window as usize + threshold
            || (self.advertised_window as usize) >= free + threshold
        {
            free as u16
        } else {
            self.advertised_window
        }
    }

    fn build_segment(&self, flags: u8, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut header = TcpHeader {
            src_port: self.local.port(),
            dst_port: self.remote.port(),
            seq_num: seq,
            ack_num: self.recv_next,
            flags,
            window: self.advertised_window,
            checksum: 0,
            urgent_ptr: 0,
        };
        header.calculate_checksum(self.local.ip(), self.remote.ip(), payload);

        let mut segment = Vec::with_capacity(TcpHeader::SIZE + payload.len());
        segment.extend_from_slice(&header.to_bytes());
        segment.extend_from_slice(payload);
        segment
    }

    fn transmit(&mut self, flags: u8, seq: u32, payload: &[u8]) -> Result<(), KernelError> {
        let segment = self.build_segment(flags, seq, payload);
        super::ip::send(self.remote.ip(), IpProtocol::Tcp, &segment)?;

        if flags & (TcpFlags::SYN | TcpFlags::FIN) != 0 || !payload.is_empty() {
            self.retransmit = Some(RetransmitEntry {
                seq,
                flags,
                payload: payload.to_vec(),
                ticks_remaining: TCP_RETRANSMIT_TIMEOUT_TICKS,
                retries: 0,
            });
        }
        Ok(())
    }

    /// Initiate connection (active open): send SYN, move to SynSent.
    pub fn connect(&mut self) -> Result<(), KernelError> {
        if self.state != TcpState::Closed {
            return Err(KernelError::InvalidState {
                expected: "Closed",
                actual: "Other",
            });
        }

        let iss = generate_initial_seq();
        self.send_unacked = iss;
        self.send_next = iss.wrapping_add(1);
        self.state = TcpState::SynSent;
        self.transmit(TcpFlags::SYN, iss, &[])
    }

    /// Listen for connections (passive open)
    pub fn listen(&mut self) -> Result<(), KernelError> {
        if self.state != TcpState::Closed {
            return Err(KernelError::InvalidState {
                expected: "Closed",
                actual: "Other",
            });
        }

        self.state = TcpState::Listen;
        Ok(())
    }

    /// Build the connection `accept()` creates for a queued incoming SYN:
    /// sends SYN+ACK and moves straight to `SynReceived`. The listening
    /// connection itself never changes state; this is always a fresh
    /// control block bound to the specific remote peer.
    pub fn accept_from_listener(
        local: SocketAddr,
        remote: SocketAddr,
        peer_isn: u32,
    ) -> Result<Self, KernelError> {
        let mut conn = Self::new(local, remote);
        conn.recv_next = peer_isn.wrapping_add(1);

        let iss = generate_initial_seq();
        conn.send_unacked = iss;
        conn.send_next = iss.wrapping_add(1);
        conn.state = TcpState::SynReceived;
        conn.transmit(TcpFlags::SYN | TcpFlags::ACK, iss, &[])?;
        Ok(conn)
    }

    /// Queue `data` for transmission. Returns the number of bytes accepted
    /// into the send buffer, which may be less than `data.len()` if the
    /// buffer is full.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        if self.state != TcpState::Established && self.state != TcpState::CloseWait {
            return Err(KernelError::InvalidState {
                expected: "Established",
                actual: "Other",
            });
        }

        let room = TCP_SEND_BUFFER_CAPACITY.saturating_sub(self.send_buffer.len());
        let accepted = data.len().min(room);
        self.send_buffer.extend_from_slice(&data[..accepted]);

        self.flush_send_buffer()?;
        Ok(accepted)
    }

    /// Push as much of the send buffer out as the peer's window allows.
    fn flush_send_buffer(&mut self) -> Result<(), KernelError> {
        if self.send_buffer.is_empty() || self.retransmit.is_some() {
            // One unacked segment in flight at a time keeps the
            // retransmit slot unambiguous.
            return Ok(());
        }

        let window = self.send_window as usize;
        let chunk_len = self.send_buffer.len().min(window).min(TCP_MSS);
        if chunk_len == 0 {
            return Ok(());
        }

        let chunk: Vec<u8> = self.send_buffer.drain(..chunk_len).collect();
        let seq = self.send_next;
        self.send_next = self.send_next.wrapping_add(chunk.len() as u32);
        self.transmit(TcpFlags::ACK | TcpFlags::PSH, seq, &chunk)
    }

    /// Drain received, in-order bytes into `buffer`.
    pub fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, KernelError> {
        if self.recv_buffer.is_empty()
            && !matches!(
                self.state,
                TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
            )
        {
            if self.state == TcpState::CloseWait || self.state == TcpState::Closing {
                return Ok(0); // peer closed, no more data coming
            }
            return Err(KernelError::InvalidState {
                expected: "Established",
                actual: "Other",
            });
        }

        let n = buffer.len().min(self.recv_buffer.len());
        buffer[..n].copy_from_slice(&self.recv_buffer[..n]);
        self.recv_buffer.drain(..n);
        self.advertised_window = self.recv_window_advertisement();
        Ok(n)
    }

    /// Close connection: send FIN from Established or CloseWait.
    pub fn close(&mut self) -> Result<(), KernelError> {
        match self.state {
            TcpState::Established => {
                let seq = self.send_next;
                self.send_next = self.send_next.wrapping_add(1);
                self.state = TcpState::FinWait1;
                self.transmit(TcpFlags::FIN | TcpFlags::ACK, seq, &[])
            }
            TcpState::CloseWait => {
                let seq = self.send_next;
                self.send_next = self.send_next.wrapping_add(1);
                self.state = TcpState::LastAck;
                self.transmit(TcpFlags::FIN | TcpFlags::ACK, seq, &[])
            }
            _ => Err(KernelError::InvalidState {
                expected: "Established or CloseWait",
                actual: "Other",
            }),
        }
    }

    /// Advance retransmit and TIME_WAIT timers by one tick. Returns `true`
    /// if the connection should be torn down (retransmit limit hit, or
    /// TIME_WAIT elapsed).
    fn tick(&mut self) -> bool {
        if let Some(tw) = self.time_wait_ticks.as_mut() {
            if *tw == 0 {
                return true;
            }
            *tw -= 1;
            if *tw == 0 {
                return true;
            }
        }

        let mut expired = None;
        if let Some(rt) = self.retransmit.as_mut() {
            if rt.ticks_remaining == 0 {
                if rt.retries >= TCP_MAX_RETRANSMITS {
                    return true;
                }
                rt.retries += 1;
                rt.ticks_remaining = TCP_RETRANSMIT_TIMEOUT_TICKS << rt.retries.min(4);
                expired = Some((rt.seq, rt.flags, rt.payload.clone()));
            } else {
                rt.ticks_remaining -= 1;
            }
        }

        if let Some((seq, flags, payload)) = expired {
            let segment = self.build_segment(flags, seq, &payload);
            let _ = super::ip::send(self.remote.ip(), IpProtocol::Tcp, &segment);
        }

        false
    }

    fn enter_time_wait(&mut self) {
        self.state = TcpState::TimeWait;
        self.time_wait_ticks = Some(TCP_TIME_WAIT_TIMEOUT_TICKS);
    }

    /// Apply an incoming segment to this connection's state machine.
    fn on_segment(
        &mut self,
        header: &TcpHeader,
        payload: &[u8],
    ) -> Result<Option<PendingAccept>, KernelError> {
        let flags = TcpFlags::new(header.flags);
        self.send_window = header.window;

        if flags.has(TcpFlags::RST) {
            self.state = TcpState::Closed;
            return Ok(None);
        }

        let mut pending_accept = None;

        match self.state {
            TcpState::Listen => {
                // Listening connections never mutate in place; a fresh
                // SYN is handed to the socket layer's backlog instead
                // (see `process_packet`), which creates a dedicated
                // control block via `accept_from_listener`.
            }
            TcpState::SynSent => {
                if flags.has(TcpFlags::SYN) {
                    self.recv_next = header.seq_num.wrapping_add(1);
                    if flags.has(TcpFlags::ACK) && header.ack_num == self.send_next {
                        self.send_unacked = header.ack_num;
                        self.state = TcpState::Established;
                        self.retransmit = None;
                        self.transmit(TcpFlags::ACK, self.send_next, &[])?;
                    } else {
                        self.state = TcpState::SynReceived;
                        self.transmit(TcpFlags::SYN | TcpFlags::ACK, self.send_unacked, &[])?;
                    }
                }
            }
            TcpState::SynReceived => {
                if flags.has(TcpFlags::ACK) && header.ack_num == self.send_next {
                    self.send_unacked = header.ack_num;
                    self.state = TcpState::Established;
                    self.retransmit = None;
                    pending_accept = Some(PendingAccept {
                        local: self.local,
                        remote: self.remote,
                    });
                }
            }
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 => {
                if flags.has(TcpFlags::ACK) {
                    self.acknowledge(header.ack_num);
                }
                self.accept_payload(header.seq_num, payload);
                if flags.has(TcpFlags::FIN) {
                    self.recv_next = self.recv_next.wrapping_add(1);
                    self.transmit(TcpFlags::ACK, self.send_next, &[])?;
                    self.state = match self.state {
                        TcpState::Established => TcpState::CloseWait,
                        TcpState::FinWait1 => TcpState::Closing,
                        TcpState::FinWait2 => {
                            self.enter_time_wait();
                            TcpState::TimeWait
                        }
                        other => other,
                    };
                } else if self.state == TcpState::FinWait1
                    && flags.has(TcpFlags::ACK)
                    && self.retransmit.is_none()
                {
                    self.state = TcpState::FinWait2;
                }
            }
            TcpState::Closing => {
                if flags.has(TcpFlags::ACK) {
                    self.acknowledge(header.ack_num);
                    if self.retransmit.is_none() {
                        self.enter_time_wait();
                    }
                }
            }
            TcpState::LastAck => {
                if flags.has(TcpFlags::ACK) {
                    self.acknowledge(header.ack_num);
                    if self.retransmit.is_none() {
                        self.state = TcpState::Closed;
                    }
                }
            }
            TcpState::CloseWait | TcpState::TimeWait | TcpState::Closed => {}
        }

        self.advertised_window = self.recv_window_advertisement();
        Ok(pending_accept)
    }

    fn acknowledge(&mut self, ack_num: u32) {
        if let Some(rt) = &self.retransmit {
            let segment_end = rt
                .seq
                .wrapping_add(rt.payload.len() as u32)
                .wrapping_add(u32::from(rt.flags & (TcpFlags::SYN | TcpFlags::FIN) != 0));
            if ack_num == segment_end || seq_ge(ack_num, segment_end) {
                self.retransmit = None;
            }
        }
        if seq_ge(ack_num, self.send_unacked) {
            self.send_unacked = ack_num;
        }
        let _ = self.flush_send_buffer();
    }

    fn accept_payload(&mut self, seq_num: u32, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        if seq_num != self.recv_next {
            return; // out-of-order segment; no reassembly queue in this build
        }
        let room = TCP_RECV_BUFFER_CAPACITY.saturating_sub(self.recv_buffer.len());
        let accepted = payload.len().min(room);
        self.recv_buffer.extend_from_slice(&payload[..accepted]);
        self.recv_next = self.recv_next.wrapping_add(accepted as u32);
    }
}

/// Sequence-number comparison accounting for 32-bit wraparound.
fn seq_ge(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) < (1 << 31)
}

struct PendingAccept {
    local: SocketAddr,
    remote: SocketAddr,
}

/// Initialize TCP
pub fn init() -> Result<(), KernelError> {
    println!("[TCP] Initializing TCP protocol...");
    println!("[TCP] TCP initialized");
    Ok(())
}

// ============================================================================
// Socket Layer Interface
// ============================================================================

/// Global TCP connection table, keyed by socket id.
static TCP_CONNECTIONS: Mutex<BTreeMap<usize, TcpConnection>> = Mutex::new(BTreeMap::new());

/// Register a new connection (used by `connect`/`listen`/`accept`).
pub fn register_connection(socket_id: usize, connection: TcpConnection) {
    TCP_CONNECTIONS.lock().insert(socket_id, connection);
}

/// Run `f` with the connection for `socket_id`, if registered.
pub fn with_connection<R>(socket_id: usize, f: impl FnOnce(&mut TcpConnection) -> R) -> Option<R> {
    TCP_CONNECTIONS.lock().get_mut(&socket_id).map(f)
}

/// Transmit data queued on `socket_id`.
pub fn transmit_data(socket_id: usize, data: &[u8]) -> Result<usize, KernelError> {
    let mut connections = TCP_CONNECTIONS.lock();
    let conn = connections.get_mut(&socket_id).ok_or(KernelError::NotFound {
        resource: "tcp_socket",
        id: socket_id as u64,
    })?;
    conn.send(data)
}

/// Receive data for `socket_id` into `buffer`.
pub fn receive_data(socket_id: usize, buffer: &mut [u8]) -> Result<usize, KernelError> {
    let mut connections = TCP_CONNECTIONS.lock();
    let conn = connections.get_mut(&socket_id).ok_or(KernelError::NotFound {
        resource: "tcp_socket",
        id: socket_id as u64,
    })?;
    conn.recv(buffer)
}

/// Close a TCP connection.
pub fn close_connection(socket_id: usize) {
    let mut connections = TCP_CONNECTIONS.lock();
    if let Some(conn) = connections.get_mut(&socket_id) {
        let _ = conn.close();
    }
}

/// Process incoming TCP packet (called by the IP layer).
pub fn process_packet(src_addr: IpAddress, dst_addr: IpAddress, data: &[u8]) -> Result<(), KernelError> {
    let (header, data_offset) = TcpHeader::from_bytes(data)?;
    let payload = &data[data_offset..];
    if !header.verify_checksum(src_addr, dst_addr, payload) {
        return Err(KernelError::InvalidArgument {
            name: "tcp_checksum",
            value: "mismatch",
        });
    }

    let remote = SocketAddr::new(src_addr, header.src_port);
    let local = SocketAddr::new(dst_addr, header.dst_port);

    let mut connections = TCP_CONNECTIONS.lock();

    let matched_id = connections
        .iter()
        .find(|(_, c)| c.local == local && c.remote == remote)
        .map(|(id, _)| *id);

    if let Some(id) = matched_id {
        let conn = connections.get_mut(&id).unwrap();
        conn.on_segment(&header, payload)?;
        return Ok(());
    }

    let listener_id = connections
        .iter()
        .find(|(_, c)| c.state == TcpState::Listen && c.local.port() == local.port())
        .map(|(id, _)| *id);

    if let (Some(_listener_id), true) = (listener_id, TcpFlags::new(header.flags).has(TcpFlags::SYN))
    {
        drop(connections);
        let _ = super::socket::queue_pending_connection(local, remote, header.seq_num);
        return Ok(());
    }

    drop(connections);
    if !TcpFlags::new(header.flags).has(TcpFlags::RST) {
        #[cfg(feature = "net_debug")]
        println!("[TCP] No matching connection for {:?}, would send RST", remote);
    }

    Ok(())
}

/// Advance every connection's retransmit/TIME_WAIT timers by one tick,
/// removing any connection whose timers say it should be torn down.
pub fn tick() {
    let mut connections = TCP_CONNECTIONS.lock();
    let mut done = Vec::new();
    for (id, conn) in connections.iter_mut() {
        if conn.tick() {
            done.push(*id);
        }
    }
    for id in done {
        connections.remove(&id);
    }
}

/// Generate initial sequence number
fn generate_initial_seq() -> u32 {
    // A full build would mix in a timer tick and random bits (RFC 793
    // section 3.3); this is a simple monotonic counter.
    static COUNTER: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(1_000_000);
    COUNTER.fetch_add(64000, core::sync::atomic::Ordering::Relaxed)
}

/// Get connection statistics
pub fn get_stats() -> TcpStats {
    let connections = TCP_CONNECTIONS.lock();
    TcpStats {
        active_connections: connections.len(),
        total_bytes_sent: 0,
        total_bytes_recv: 0,
        retransmissions: 0,
    }
}

/// TCP statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpStats {
    pub active_connections: usize,
    pub total_bytes_sent: u64,
    pub total_bytes_recv: u64,
    pub retransmissions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test_case]
    fn test_tcp_flags() {
        let mut flags = TcpFlags::new(0);
        flags.set(TcpFlags::SYN);
        assert!(flags.has(TcpFlags::SYN));
        assert!(!flags.has(TcpFlags::ACK));
    }

    #[test_case]
    fn test_tcp_connection_starts_closed() {
        let local = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);
        let remote = SocketAddr::v4(Ipv4Address::new(192, 168, 1, 1), 80);
        let conn = TcpConnection::new(local, remote);

        assert_eq!(conn.state, TcpState::Closed);
    }

    #[test_case]
    fn test_tcp_header_roundtrip() {
        let mut header = TcpHeader {
            src_port: 1234,
            dst_port: 80,
            seq_num: 100,
            ack_num: 0,
            flags: TcpFlags::SYN,
            window: 65535,
            checksum: 0,
            urgent_ptr: 0,
        };
        let src = IpAddress::V4(Ipv4Address::new(10, 0, 0, 1));
        let dst = IpAddress::V4(Ipv4Address::new(10, 0, 0, 2));
        header.calculate_checksum(src, dst, &[]);

        let bytes = header.to_bytes();
        let (parsed, offset) = TcpHeader::from_bytes(&bytes).unwrap();
        assert_eq!(offset, TcpHeader::SIZE);
        assert_eq!(parsed.seq_num, 100);
        assert!(parsed.verify_checksum(src, dst, &[]));
    }

    #[test_case]
    fn seq_ge_handles_wraparound() {
        assert!(seq_ge(10, 5));
        assert!(!seq_ge(5, 10));
        assert!(seq_ge(0u32.wrapping_sub(1).wrapping_add(2), 0));
    }
}
