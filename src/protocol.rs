//! RTP-style wire packet model
//!
//! One packet per audio frame, carried in a single UDP datagram. The
//! header is fixed-size and big-endian so both endpoints agree without
//! negotiation:
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2| reserved  |M|     PT      |        sequence number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           stream id                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        payload length         |  payload (length bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The timestamp counts samples at the stream's sample rate and advances
//! by one frame's sample count per packet; the sequence number advances
//! by one. Both wrap, and all comparisons on them elsewhere in the crate
//! use half-range signed-difference arithmetic.

use bytes::{Bytes, BytesMut};

/// Protocol version carried in the top two bits of the first byte
pub const PACKET_VERSION: u8 = 2;

/// Fixed header size in bytes
pub const HEADER_LEN: usize = 14;

/// Largest payload the length field can declare
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// One network-transmitted audio frame. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Identifies the logical audio source; constant per session
    pub stream_id: u32,
    /// Selects the codec via the registry (7 bits on the wire)
    pub payload_type: u8,
    /// True on the first packet of a talk spurt after silence
    pub marker: bool,
    /// Increments by 1 per packet, wraps mod 65536
    pub sequence_number: u16,
    /// Increments by the frame's sample count, wraps mod 2^32
    pub timestamp: u32,
    /// Encoded audio bytes
    pub payload: Bytes,
}

/// Outcome of a parse attempt. Never a hard error: malformed datagrams
/// are dropped by the caller, short reads can be retried on stream
/// transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Ok(RtpPacket),
    /// More bytes are needed for a complete header + declared payload
    Incomplete,
    /// Header fields are structurally impossible
    Invalid,
}

impl RtpPacket {
    /// Parse one packet from `buf[*offset..end]`.
    ///
    /// On `Ok`, `*offset` advances past the consumed bytes. On
    /// `Incomplete` or `Invalid` the offset is untouched.
    pub fn parse(buf: &[u8], offset: &mut usize, end: usize) -> ParseOutcome {
        let start = *offset;
        debug_assert!(start <= end && end <= buf.len());
        if end - start < HEADER_LEN {
            return ParseOutcome::Incomplete;
        }

        let first = buf[start];
        if first >> 6 != PACKET_VERSION || first & 0x3F != 0 {
            return ParseOutcome::Invalid;
        }

        let second = buf[start + 1];
        let marker = second & 0x80 != 0;
        let payload_type = second & 0x7F;

        let sequence_number = u16::from_be_bytes([buf[start + 2], buf[start + 3]]);
        let timestamp = u32::from_be_bytes([
            buf[start + 4],
            buf[start + 5],
            buf[start + 6],
            buf[start + 7],
        ]);
        let stream_id = u32::from_be_bytes([
            buf[start + 8],
            buf[start + 9],
            buf[start + 10],
            buf[start + 11],
        ]);
        let payload_len = u16::from_be_bytes([buf[start + 12], buf[start + 13]]) as usize;

        if end - start - HEADER_LEN < payload_len {
            return ParseOutcome::Incomplete;
        }

        let payload_start = start + HEADER_LEN;
        let payload = Bytes::copy_from_slice(&buf[payload_start..payload_start + payload_len]);
        *offset = payload_start + payload_len;

        ParseOutcome::Ok(RtpPacket {
            stream_id,
            payload_type,
            marker,
            sequence_number,
            timestamp,
            payload,
        })
    }

    /// Write the packet into `buf` at `*offset`, growing the buffer if
    /// needed, and advance `*offset` past the written bytes.
    ///
    /// `pack` and [`parse`](Self::parse) are exact inverses for every
    /// packet whose payload fits the length field.
    pub fn pack(&self, buf: &mut BytesMut, offset: &mut usize) {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_LEN);
        let start = *offset;
        let total = HEADER_LEN + self.payload.len();
        if buf.len() < start + total {
            buf.resize(start + total, 0);
        }

        buf[start] = PACKET_VERSION << 6;
        buf[start + 1] = (self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 };
        buf[start + 2..start + 4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[start + 4..start + 8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[start + 8..start + 12].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[start + 12..start + 14].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf[start + HEADER_LEN..start + total].copy_from_slice(&self.payload);

        *offset = start + total;
    }

    /// Total wire size of this packet in bytes
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Convenience: pack into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        let mut offset = 0;
        self.pack(&mut buf, &mut offset);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_packet() -> RtpPacket {
        RtpPacket {
            stream_id: 0xabcd_ef01,
            payload_type: 101,
            marker: true,
            sequence_number: 1000,
            timestamp: 123_456,
            payload: Bytes::from_static(&[1, 2, 3, 4, 5]),
        }
    }

    #[test]
    fn pack_parse_round_trip() {
        let packet = sample_packet();
        let mut buf = BytesMut::new();
        let mut offset = 0;
        packet.pack(&mut buf, &mut offset);
        assert_eq!(offset, packet.wire_len());

        let mut read = 0;
        match RtpPacket::parse(&buf, &mut read, offset) {
            ParseOutcome::Ok(parsed) => {
                assert_eq!(parsed, packet);
                assert_eq!(read, offset);
            }
            other => panic!("expected Ok, got {:?}", other),
        }
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut buf = BytesMut::new();
        let mut offset = 0;
        sample_packet().pack(&mut buf, &mut offset);
        buf[0] = 1 << 6; // version 1
        let mut read = 0;
        assert_eq!(RtpPacket::parse(&buf, &mut read, offset), ParseOutcome::Invalid);
        assert_eq!(read, 0);
    }

    #[test]
    fn parse_rejects_nonzero_reserved_bits() {
        let mut buf = BytesMut::new();
        let mut offset = 0;
        sample_packet().pack(&mut buf, &mut offset);
        buf[0] |= 0x08;
        let mut read = 0;
        assert_eq!(RtpPacket::parse(&buf, &mut read, offset), ParseOutcome::Invalid);
    }

    #[test]
    fn parse_short_header_is_incomplete() {
        let buf = [PACKET_VERSION << 6; 8];
        let mut read = 0;
        assert_eq!(
            RtpPacket::parse(&buf, &mut read, buf.len()),
            ParseOutcome::Incomplete
        );
        assert_eq!(read, 0);
    }

    #[test]
    fn parse_truncated_payload_is_incomplete() {
        let mut buf = BytesMut::new();
        let mut offset = 0;
        sample_packet().pack(&mut buf, &mut offset);
        let mut read = 0;
        assert_eq!(
            RtpPacket::parse(&buf, &mut read, offset - 1),
            ParseOutcome::Incomplete
        );
        assert_eq!(read, 0);
    }

    #[test]
    fn parse_consumes_consecutive_packets() {
        let a = sample_packet();
        let b = RtpPacket {
            sequence_number: a.sequence_number.wrapping_add(1),
            timestamp: a.timestamp.wrapping_add(480),
            marker: false,
            payload: Bytes::from_static(&[9, 9]),
            ..a.clone()
        };

        let mut buf = BytesMut::new();
        let mut offset = 0;
        a.pack(&mut buf, &mut offset);
        b.pack(&mut buf, &mut offset);

        let mut read = 0;
        assert_eq!(RtpPacket::parse(&buf, &mut read, offset), ParseOutcome::Ok(a));
        assert_eq!(RtpPacket::parse(&buf, &mut read, offset), ParseOutcome::Ok(b));
        assert_eq!(read, offset);
    }

    #[test]
    fn empty_payload_round_trips() {
        let packet = RtpPacket {
            payload: Bytes::new(),
            ..sample_packet()
        };
        let mut buf = BytesMut::new();
        let mut offset = 0;
        packet.pack(&mut buf, &mut offset);
        assert_eq!(offset, HEADER_LEN);

        let mut read = 0;
        assert_eq!(RtpPacket::parse(&buf, &mut read, offset), ParseOutcome::Ok(packet));
    }

    proptest! {
        #[test]
        fn round_trip_property(
            stream_id in any::<u32>(),
            payload_type in 0u8..128,
            marker in any::<bool>(),
            sequence_number in any::<u16>(),
            timestamp in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..600),
        ) {
            let packet = RtpPacket {
                stream_id,
                payload_type,
                marker,
                sequence_number,
                timestamp,
                payload: Bytes::from(payload),
            };

            let mut buf = BytesMut::new();
            let mut offset = 0;
            packet.pack(&mut buf, &mut offset);

            let mut read = 0;
            match RtpPacket::parse(&buf, &mut read, offset) {
                ParseOutcome::Ok(parsed) => {
                    prop_assert_eq!(parsed, packet);
                    prop_assert_eq!(read, offset);
                }
                other => prop_assert!(false, "expected Ok, got {:?}", other),
            }
        }
    }
}
