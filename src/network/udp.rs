//! UDP packet transport
//!
//! Carries one packet per datagram. Receiving is passive: a dedicated
//! thread parses inbound datagrams and delivers the containers into a
//! bounded channel, so the network side never touches audio state
//! directly. Malformed datagrams are dropped and counted, never
//! surfaced as errors.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{trace, warn};

use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;
use crate::protocol::{ParseOutcome, RtpPacket};

/// One packet plus the endpoint it came from or goes to
#[derive(Debug, Clone)]
pub struct PacketContainer {
    pub endpoint: SocketAddr,
    pub packet: RtpPacket,
}

/// Abstract send side of the message channel. Pipelines depend on this
/// instead of a concrete socket so they are testable in isolation.
pub trait Transport: Send + Sync {
    fn send(&self, container: &PacketContainer) -> Result<(), NetworkError>;
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
    dropped: AtomicU64,
}

/// Transport statistics (snapshot)
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    /// Parsed packets dropped because the delivery channel was full
    pub dropped: u64,
}

/// Create a bound UDP socket with tuned buffer sizes. Port 0 picks an
/// ephemeral port (sender side).
pub fn create_socket(
    port: u16,
    recv_buffer_size: usize,
    send_buffer_size: usize,
) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_recv_buffer_size(recv_buffer_size)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_send_buffer_size(send_buffer_size)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}

pub struct UdpTransport {
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    recv_thread: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl UdpTransport {
    /// Bind failure is fatal at session start, by contract.
    pub fn bind(
        port: u16,
        recv_buffer_size: usize,
        send_buffer_size: usize,
    ) -> Result<Self, NetworkError> {
        let socket = create_socket(port, recv_buffer_size, send_buffer_size)?;
        Ok(Self {
            socket,
            running: Arc::new(AtomicBool::new(false)),
            recv_thread: None,
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    /// Start the passive receive thread, delivering parsed containers
    /// into `delivery`. Runs until [`stop`](Self::stop).
    pub fn start(&mut self, delivery: Sender<PacketContainer>) -> Result<(), NetworkError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let socket = self
            .socket
            .try_clone()
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
        // Periodic timeout so the thread can observe shutdown
        socket
            .set_read_timeout(Some(Duration::from_millis(250)))
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        let running = self.running.clone();
        let counters = self.counters.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("udp-receive".to_string())
            .spawn(move || {
                let mut buf = [0u8; MAX_PACKET_SIZE];
                while running.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, endpoint)) => {
                            counters.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                            let mut offset = 0;
                            match RtpPacket::parse(&buf, &mut offset, len) {
                                ParseOutcome::Ok(packet) => {
                                    counters.packets_received.fetch_add(1, Ordering::Relaxed);
                                    if delivery
                                        .try_send(PacketContainer { endpoint, packet })
                                        .is_err()
                                    {
                                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                                        trace!("Delivery channel full, dropping packet");
                                    }
                                }
                                _ => {
                                    counters.invalid_packets.fetch_add(1, Ordering::Relaxed);
                                    trace!(%endpoint, len, "Dropping malformed datagram");
                                }
                            }
                        }
                        Err(e)
                            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                        {
                            continue;
                        }
                        Err(e) => {
                            warn!("UDP receive error: {}", e);
                        }
                    }
                }
            })
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        self.recv_thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.counters.invalid_packets.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Transport for UdpTransport {
    fn send(&self, container: &PacketContainer) -> Result<(), NetworkError> {
        let wire_len = container.packet.wire_len();
        if wire_len > MAX_PACKET_SIZE {
            return Err(NetworkError::PacketTooLarge(wire_len));
        }

        let bytes = container.packet.to_bytes();
        match self.socket.send_to(&bytes, container.endpoint) {
            Ok(sent) => {
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crossbeam_channel::bounded;

    fn packet(seq: u16) -> RtpPacket {
        RtpPacket {
            stream_id: 7,
            payload_type: 0,
            marker: false,
            sequence_number: seq,
            timestamp: u32::from(seq) * 480,
            payload: Bytes::from(vec![0xAAu8; 32]),
        }
    }

    #[test]
    fn loopback_send_receive() {
        let mut rx_transport = UdpTransport::bind(0, 65536, 65536).unwrap();
        let rx_addr = rx_transport.local_addr().unwrap();
        let target: SocketAddr = format!("127.0.0.1:{}", rx_addr.port()).parse().unwrap();

        let (tx, rx) = bounded::<PacketContainer>(16);
        rx_transport.start(tx).unwrap();

        let tx_transport = UdpTransport::bind(0, 65536, 65536).unwrap();
        let sent = packet(1);
        tx_transport
            .send(&PacketContainer {
                endpoint: target,
                packet: sent.clone(),
            })
            .unwrap();

        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received.packet, sent);

        assert_eq!(tx_transport.stats().packets_sent, 1);
        assert_eq!(rx_transport.stats().packets_received, 1);
        rx_transport.stop();
    }

    #[test]
    fn malformed_datagram_is_counted_and_dropped() {
        let mut rx_transport = UdpTransport::bind(0, 65536, 65536).unwrap();
        let rx_addr = rx_transport.local_addr().unwrap();

        let (tx, rx) = bounded::<PacketContainer>(16);
        rx_transport.start(tx).unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.send_to(&[0xFFu8; 20], ("127.0.0.1", rx_addr.port()))
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
        assert_eq!(rx_transport.stats().invalid_packets, 1);
        assert_eq!(rx_transport.stats().packets_received, 0);
        rx_transport.stop();
    }

    #[test]
    fn oversized_packet_is_rejected() {
        let transport = UdpTransport::bind(0, 65536, 65536).unwrap();
        let big = RtpPacket {
            payload: Bytes::from(vec![0u8; MAX_PACKET_SIZE]),
            ..packet(0)
        };
        let result = transport.send(&PacketContainer {
            endpoint: "127.0.0.1:19000".parse().unwrap(),
            packet: big,
        });
        assert!(matches!(result, Err(NetworkError::PacketTooLarge(_))));
    }
}
