//! # audiocast
//!
//! Low-latency live audio streaming between two endpoints over UDP,
//! using RTP-style packetization and a playout jitter buffer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────── SENDER ──────────────────────────┐
//! │  Microphone ─▶ Capture Thread ─▶ SPSC Ring ─▶ Encode Loop  │
//! │                                       │                    │
//! │                              RtpSender (seq/ts/marker)     │
//! │                                       │                    │
//! │                              UdpTransport ── send ──▶      │
//! └────────────────────────────────────────────────────────────┘
//!                        │ UDP datagrams (loss, reorder, jitter)
//!                        ▼
//! ┌───────────────────────── RECEIVER ─────────────────────────┐
//! │  ──▶ UdpTransport ─▶ parse ─▶ channel ─▶ RtpReceiver       │
//! │                                             │              │
//! │                                    JitterBuffer::write     │
//! │                                             │              │
//! │  Speaker ◀─ Render Callback ◀── JitterBuffer::read         │
//! │             (always satisfied: decoded / concealed / mute) │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The jitter buffer is the single shared-state boundary between the
//! network thread (writer) and the audio render thread (reader); both
//! sides hold its lock only for bounded slot copies.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for the stream (telephony narrowband)
    pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default packet duration in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 60;

    /// Default jitter buffer depth in milliseconds
    pub const DEFAULT_JITTER_DEPTH_MS: u32 = 120;

    /// Default output latency requested from the audio device
    pub const DEFAULT_LATENCY_MS: u32 = 60;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 19000;

    /// Maximum datagram size accepted on the wire
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Capture ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    pub const MS_IN_SECOND: u32 = 1000;
}
