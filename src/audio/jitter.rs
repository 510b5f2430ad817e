//! Playout jitter buffer
//!
//! Converts an unreliable, bursty, possibly-reordered sequence of
//! packets into a continuously readable PCM stream at the session's
//! nominal rate, without ever blocking the reader.
//!
//! The buffer is a fixed window of frame-sized slots over a virtual
//! sample axis. A session anchor, established on the first accepted
//! packet and re-based on every accepted packet thereafter, maps wire
//! timestamps onto that axis using half-range signed-difference
//! arithmetic so 32-bit wraparound never misorders the window.
//!
//! `write` is called from the network thread, `read` from the audio
//! render thread; share one buffer through [`SharedJitterBuffer`]. The
//! read cursor advances unconditionally by the requested sample count
//! on every call — that is the single invariant decoupling network
//! timing from audio-device timing.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::codec::{CodecParams, CodecRegistry};
use crate::protocol::RtpPacket;

/// Consecutive out-of-window arrivals (late or premature, with no
/// accepted packet in between) that trigger an anchor re-sync. Covers
/// sender restarts whose sequence/timestamp discontinuity exceeds the
/// window.
pub const RESYNC_THRESHOLD: u32 = 8;

/// Lifecycle of one buffered frame span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Received,
    Lost,
    Concealed,
    Consumed,
}

/// What to do with packets that map beyond the window ahead of the
/// read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the premature packet and count it
    StrictDrop,
    /// Force the read cursor forward to make room, accepting a forward
    /// jump in playout over the oldest unread span
    AutoResync,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::StrictDrop
    }
}

/// Jitter buffer configuration
#[derive(Debug, Clone)]
pub struct JitterConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Nominal samples per frame (slot granularity)
    pub frame_samples: usize,
    /// Window depth in milliseconds of audio; trades latency for
    /// jitter and reordering tolerance
    pub depth_ms: u32,
    pub overflow_policy: OverflowPolicy,
    /// Loss hint forwarded to FEC-capable codecs
    pub expected_loss_perc: u8,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channels: crate::constants::DEFAULT_CHANNELS,
            frame_samples: (crate::constants::DEFAULT_SAMPLE_RATE
                / crate::constants::MS_IN_SECOND
                * crate::constants::DEFAULT_FRAME_DURATION_MS) as usize,
            depth_ms: crate::constants::DEFAULT_JITTER_DEPTH_MS,
            overflow_policy: OverflowPolicy::default(),
            expected_loss_perc: 30,
        }
    }
}

/// Diagnostic counters (snapshot)
#[derive(Debug, Clone, Default)]
pub struct JitterStats {
    /// Packets decoded and stored
    pub received: u64,
    /// Packets dropped behind the read cursor
    pub late: u64,
    /// Packets beyond the window (dropped or jumped over, per policy)
    pub overflow: u64,
    /// Frame spans synthesized by concealment
    pub concealed: u64,
    /// Frame spans fully read out
    pub consumed: u64,
    /// Packets muted for lack of a registered codec
    pub muted: u64,
    /// Packets whose payload failed to decode (treated as loss)
    pub decode_failures: u64,
    /// Anchor re-synchronizations
    pub resyncs: u64,
    /// Frames currently stored ahead of the read cursor
    pub buffered: usize,
}

impl JitterStats {
    pub fn loss_rate(&self) -> f32 {
        let total = self.received + self.concealed;
        if total == 0 {
            0.0
        } else {
            self.concealed as f32 / total as f32
        }
    }
}

/// Timestamp-to-position mapping, re-based on every accepted packet so
/// half-range deltas stay small over arbitrarily long sessions.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    timestamp: u32,
    position: u64,
}

struct Slot {
    /// Virtual frame index this slot currently represents;
    /// `u64::MAX` marks a slot that never held data
    frame: u64,
    state: SlotState,
    pcm: Vec<i16>,
}

enum ActiveCodec {
    Unresolved,
    /// Payload type seen but not decodable; stream plays silence
    Muted(u8),
    Ready {
        payload_type: u8,
        codec: Box<dyn crate::codec::Codec>,
    },
}

enum Placement {
    Late,
    Premature(u64),
    InWindow(u64),
}

pub struct JitterBuffer {
    frame_samples: usize,
    window_samples: u64,
    slot_count: usize,
    slots: Vec<Slot>,
    registry: CodecRegistry,
    codec_params: CodecParams,
    active: ActiveCodec,
    overflow_policy: OverflowPolicy,
    anchor: Option<Anchor>,
    /// Absolute read position on the virtual sample axis
    read_pos: u64,
    /// Consecutive out-of-window writes since the last accepted one
    miss_run: u32,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(config: JitterConfig, registry: CodecRegistry) -> Self {
        let frame_samples = config.frame_samples.max(1);
        let depth_samples =
            u64::from(config.sample_rate) * u64::from(config.depth_ms) / u64::from(crate::constants::MS_IN_SECOND);
        let slot_count = (depth_samples.div_ceil(frame_samples as u64)).max(2) as usize;

        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, || Slot {
            frame: u64::MAX,
            state: SlotState::Empty,
            pcm: vec![0; frame_samples],
        });

        let codec_params = CodecParams {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_samples,
            expected_loss_perc: config.expected_loss_perc,
        };

        Self {
            frame_samples,
            window_samples: slot_count as u64 * frame_samples as u64,
            slot_count,
            slots,
            registry,
            codec_params,
            active: ActiveCodec::Unresolved,
            overflow_policy: config.overflow_policy,
            anchor: None,
            read_pos: 0,
            miss_run: 0,
            stats: JitterStats::default(),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn window_samples(&self) -> u64 {
        self.window_samples
    }

    /// Store one packet, decoding it immediately. Never fails; every
    /// drop reason is a counter.
    pub fn write(&mut self, packet: RtpPacket) {
        let anchor = match self.anchor {
            Some(anchor) => anchor,
            None => self.set_anchor(packet.timestamp),
        };

        match self.placement(anchor, packet.timestamp) {
            Placement::Late => {
                self.stats.late += 1;
                trace!(
                    seq = packet.sequence_number,
                    timestamp = packet.timestamp,
                    "Late packet dropped"
                );
                self.bump_miss_run(&packet);
            }
            Placement::Premature(start) => {
                self.stats.overflow += 1;
                match self.overflow_policy {
                    OverflowPolicy::StrictDrop => {
                        trace!(
                            seq = packet.sequence_number,
                            timestamp = packet.timestamp,
                            "Premature packet dropped"
                        );
                        self.bump_miss_run(&packet);
                    }
                    OverflowPolicy::AutoResync => {
                        // Advance to the slot boundary that puts the
                        // packet's frame at the window's far edge.
                        let fs = self.frame_samples as u64;
                        let jump_to = ((start / fs + 1) * fs).saturating_sub(self.window_samples);
                        if jump_to > self.read_pos {
                            warn!(
                                skipped = jump_to - self.read_pos,
                                "Window overflow, jumping playout forward"
                            );
                            self.read_pos = jump_to;
                        }
                        self.store(start, packet);
                    }
                }
            }
            Placement::InWindow(start) => self.store(start, packet),
        }
    }

    /// Fill `out` completely with decoded, concealed, or silent PCM.
    /// Never blocks, never fails; the cursor advances by `out.len()`
    /// samples unconditionally.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        let fs = self.frame_samples as u64;
        let mut filled = 0usize;

        while filled < out.len() {
            let frame = self.read_pos / fs;
            let offset = (self.read_pos % fs) as usize;
            let take = (self.frame_samples - offset).min(out.len() - filled);

            if self.anchor.is_none() {
                // Stream has not started; emit silence but keep the
                // cursor moving so device timing stays decoupled.
                out[filled..filled + take].fill(0);
            } else {
                let idx = (frame % self.slot_count as u64) as usize;
                let holds_data = {
                    let slot = &self.slots[idx];
                    slot.frame == frame
                        && matches!(slot.state, SlotState::Received | SlotState::Concealed)
                };

                if !holds_data {
                    // Deadline reached with nothing stored for this
                    // span: mark it lost and synthesize a continuation.
                    let slot = &mut self.slots[idx];
                    slot.frame = frame;
                    slot.state = SlotState::Lost;
                    if let ActiveCodec::Ready { codec, .. } = &mut self.active {
                        match codec.conceal(&mut slot.pcm) {
                            Ok(written) => slot.pcm[written..].fill(0),
                            Err(e) => {
                                debug!(error = %e, "Concealment failed, substituting silence");
                                slot.pcm.fill(0);
                            }
                        }
                    } else {
                        slot.pcm.fill(0);
                    }
                    slot.state = SlotState::Concealed;
                    self.stats.concealed += 1;
                    trace!(frame, "Concealed missing frame");
                }

                let slot = &mut self.slots[idx];
                out[filled..filled + take].copy_from_slice(&slot.pcm[offset..offset + take]);
                if offset + take == self.frame_samples {
                    slot.state = SlotState::Consumed;
                    self.stats.consumed += 1;
                }
            }

            filled += take;
            self.read_pos += take as u64;
        }

        out.len()
    }

    pub fn stats(&self) -> JitterStats {
        let mut stats = self.stats.clone();
        stats.buffered = self.buffered_frames();
        stats
    }

    fn buffered_frames(&self) -> usize {
        let current = self.read_pos / self.frame_samples as u64;
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Received && s.frame >= current)
            .count()
    }

    fn set_anchor(&mut self, timestamp: u32) -> Anchor {
        let fs = self.frame_samples as u64;
        // First mappable sample is the next slot boundary at or ahead
        // of the read cursor.
        let position = self.read_pos.div_ceil(fs) * fs;
        let anchor = Anchor {
            timestamp,
            position,
        };
        self.anchor = Some(anchor);
        anchor
    }

    fn placement(&self, anchor: Anchor, timestamp: u32) -> Placement {
        let delta = i64::from(timestamp.wrapping_sub(anchor.timestamp) as i32);
        let start = anchor.position as i64 + delta;

        // Window end is slot-aligned: a packet may never map onto the
        // slot the cursor is currently inside from the far side.
        let fs = self.frame_samples as u64;
        let window_end = (self.read_pos / fs) * fs + self.window_samples;

        if start < self.read_pos as i64 {
            Placement::Late
        } else if start as u64 >= window_end {
            Placement::Premature(start as u64)
        } else {
            Placement::InWindow(start as u64)
        }
    }

    fn bump_miss_run(&mut self, packet: &RtpPacket) {
        self.miss_run += 1;
        if self.miss_run >= RESYNC_THRESHOLD {
            warn!(
                timestamp = packet.timestamp,
                "Sustained out-of-window arrivals, re-anchoring stream"
            );
            for slot in &mut self.slots {
                slot.frame = u64::MAX;
                slot.state = SlotState::Empty;
            }
            self.miss_run = 0;
            self.stats.resyncs += 1;
            let anchor = self.set_anchor(packet.timestamp);
            self.store(anchor.position, packet.clone());
        }
    }

    fn store(&mut self, start: u64, packet: RtpPacket) {
        self.ensure_codec(packet.payload_type);

        let fs = self.frame_samples as u64;
        // Timestamps off the nominal frame grid map to the containing
        // slot.
        let frame = start / fs;
        let idx = (frame % self.slot_count as u64) as usize;

        match &mut self.active {
            ActiveCodec::Ready { codec, .. } => {
                let slot = &mut self.slots[idx];
                let decoded = match codec.probe_sample_count(&packet.payload) {
                    Ok(n) if n <= slot.pcm.len() => match codec.decode(&packet.payload, &mut slot.pcm) {
                        Ok(written) => {
                            slot.pcm[written..].fill(0);
                            true
                        }
                        Err(e) => {
                            debug!(error = %e, seq = packet.sequence_number, "Decode failed, treating as loss");
                            false
                        }
                    },
                    Ok(n) => {
                        debug!(samples = n, "Payload exceeds slot span, treating as loss");
                        false
                    }
                    Err(e) => {
                        debug!(error = %e, "Payload probe failed, treating as loss");
                        false
                    }
                };

                if decoded {
                    slot.frame = frame;
                    slot.state = SlotState::Received;
                    self.stats.received += 1;
                } else {
                    self.stats.decode_failures += 1;
                }
            }
            _ => {
                // Known-arrived but undecodable stream: play silence
                // for exactly this span instead of concealing it.
                let slot = &mut self.slots[idx];
                slot.frame = frame;
                slot.pcm.fill(0);
                slot.state = SlotState::Received;
                self.stats.muted += 1;
            }
        }

        self.miss_run = 0;
        self.anchor = Some(Anchor {
            timestamp: packet.timestamp,
            position: start,
        });
    }

    fn ensure_codec(&mut self, payload_type: u8) {
        let current = match &self.active {
            ActiveCodec::Ready { payload_type: pt, .. } => Some(*pt),
            ActiveCodec::Muted(pt) => Some(*pt),
            ActiveCodec::Unresolved => None,
        };
        if current == Some(payload_type) {
            return;
        }

        match self.registry.create(payload_type, &self.codec_params) {
            Ok(Some(codec)) => {
                debug!(payload_type, "Resolved stream codec");
                self.active = ActiveCodec::Ready {
                    payload_type,
                    codec,
                };
            }
            Ok(None) => {
                warn!(payload_type, "No codec registered, muting stream");
                self.active = ActiveCodec::Muted(payload_type);
            }
            Err(e) => {
                warn!(payload_type, error = %e, "Codec construction failed, muting stream");
                self.active = ActiveCodec::Muted(payload_type);
            }
        }
    }
}

/// Handle shared between the network writer and the audio reader.
/// Both sides hold the lock only for bounded slot copies.
pub type SharedJitterBuffer = Arc<Mutex<JitterBuffer>>;

pub fn create_shared(config: JitterConfig, registry: CodecRegistry) -> SharedJitterBuffer {
    Arc::new(Mutex::new(JitterBuffer::new(config, registry)))
}
