//! Sender pipeline: PCM frames in, RTP packets out
//!
//! Fire-and-forget: no retry, no acknowledgment. Each fixed-duration
//! frame is encoded, packetized with an incrementing sequence number
//! and a timestamp advanced by the frame's sample count, and handed to
//! the transport for immediate send.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::CodecError;
use crate::network::udp::{PacketContainer, Transport};
use crate::protocol::RtpPacket;

/// Sender statistics (snapshot)
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub frames_encoded: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

pub struct RtpSender {
    transport: Arc<dyn Transport>,
    remote: SocketAddr,
    codec: Box<dyn Codec>,
    payload_type: u8,
    stream_id: u32,
    sequence: u16,
    timestamp: u32,
    frame_samples: usize,
    frame_duration: Duration,
    /// Set for the first packet of the next talk spurt
    next_marker: bool,
    last_frame_at: Option<Instant>,
    /// Reused across frames to avoid per-packet allocation
    encode_buf: Vec<u8>,
    stats: SenderStats,
}

impl RtpSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        remote: SocketAddr,
        codec: Box<dyn Codec>,
        payload_type: u8,
        stream_id: u32,
        frame_samples: usize,
        sample_rate: u32,
    ) -> Self {
        // Randomized initial sequence/timestamp, per RTP convention
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Self {
            transport,
            remote,
            codec,
            payload_type,
            stream_id,
            sequence: seed as u16,
            timestamp: (seed >> 16) as u32,
            frame_samples,
            frame_duration: Duration::from_micros(
                frame_samples as u64 * 1_000_000 / u64::from(sample_rate.max(1)),
            ),
            next_marker: true,
            last_frame_at: None,
            encode_buf: vec![0u8; 4000],
            stats: SenderStats::default(),
        }
    }

    /// Encode and transmit one nominal frame. Transient send failures
    /// are logged and counted; only encode errors propagate.
    pub fn send_frame(&mut self, pcm: &[i16]) -> Result<(), CodecError> {
        if pcm.len() != self.frame_samples {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let now = Instant::now();
        if let Some(last) = self.last_frame_at {
            if now.duration_since(last) > self.frame_duration * 2 {
                debug!("Capture gap detected, flagging talk spurt");
                self.next_marker = true;
            }
        }
        self.last_frame_at = Some(now);

        let encoded = self.codec.encode(pcm, &mut self.encode_buf)?;
        self.stats.frames_encoded += 1;

        let packet = RtpPacket {
            stream_id: self.stream_id,
            payload_type: self.payload_type,
            marker: self.next_marker,
            sequence_number: self.sequence,
            timestamp: self.timestamp,
            payload: Bytes::copy_from_slice(&self.encode_buf[..encoded]),
        };
        self.next_marker = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(pcm.len() as u32);

        let container = PacketContainer {
            endpoint: self.remote,
            packet,
        };
        match self.transport.send(&container) {
            Ok(()) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += container.packet.wire_len() as u64;
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!("Packet send failed: {}", e);
            }
        }

        Ok(())
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::G711uLaw;
    use crate::error::NetworkError;
    use parking_lot::Mutex;

    const FRAME: usize = 480;

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<PacketContainer>>,
        fail: bool,
    }

    impl Transport for MockTransport {
        fn send(&self, container: &PacketContainer) -> Result<(), NetworkError> {
            if self.fail {
                return Err(NetworkError::SendFailed("mock".into()));
            }
            self.sent.lock().push(container.clone());
            Ok(())
        }
    }

    fn sender(transport: Arc<MockTransport>, frame_samples: usize) -> RtpSender {
        RtpSender::new(
            transport,
            "127.0.0.1:19000".parse().unwrap(),
            Box::new(G711uLaw::new()),
            0,
            42,
            frame_samples,
            8000,
        )
    }

    #[test]
    fn sequencing_and_timestamps_advance_per_frame() {
        let transport = Arc::new(MockTransport::default());
        let mut rtp = sender(transport.clone(), FRAME);
        let pcm = vec![100i16; FRAME];

        rtp.send_frame(&pcm).unwrap();
        rtp.send_frame(&pcm).unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].packet.sequence_number,
            sent[0].packet.sequence_number.wrapping_add(1)
        );
        assert_eq!(
            sent[1].packet.timestamp,
            sent[0].packet.timestamp.wrapping_add(FRAME as u32)
        );
        assert_eq!(sent[0].packet.stream_id, 42);
        assert_eq!(sent[0].packet.payload.len(), FRAME); // G.711: byte per sample
    }

    #[test]
    fn marker_set_on_first_packet_then_cleared() {
        let transport = Arc::new(MockTransport::default());
        let mut rtp = sender(transport.clone(), FRAME);
        let pcm = vec![0i16; FRAME];

        rtp.send_frame(&pcm).unwrap();
        rtp.send_frame(&pcm).unwrap();

        let sent = transport.sent.lock();
        assert!(sent[0].packet.marker);
        assert!(!sent[1].packet.marker);
    }

    #[test]
    fn marker_set_again_after_capture_gap() {
        let transport = Arc::new(MockTransport::default());
        // 16-sample frames at 8 kHz: 2 ms nominal duration
        let mut rtp = sender(transport.clone(), 16);
        let pcm = vec![0i16; 16];

        rtp.send_frame(&pcm).unwrap();
        rtp.send_frame(&pcm).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        rtp.send_frame(&pcm).unwrap();

        let sent = transport.sent.lock();
        assert!(sent[0].packet.marker);
        assert!(!sent[1].packet.marker);
        assert!(sent[2].packet.marker);
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let transport = Arc::new(MockTransport::default());
        let mut rtp = sender(transport, FRAME);
        let pcm = vec![0i16; FRAME - 1];
        assert!(matches!(
            rtp.send_frame(&pcm),
            Err(CodecError::InvalidFrameSize(_))
        ));
    }

    #[test]
    fn transient_send_failure_does_not_stop_session() {
        let transport = Arc::new(MockTransport {
            fail: true,
            ..MockTransport::default()
        });
        let mut rtp = sender(transport, FRAME);
        let pcm = vec![0i16; FRAME];

        assert!(rtp.send_frame(&pcm).is_ok());
        assert_eq!(rtp.stats().send_failures, 1);
        assert_eq!(rtp.stats().packets_sent, 0);
    }
}
