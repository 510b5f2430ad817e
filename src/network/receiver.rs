//! Receiver pipeline: transport channel in, jitter buffer writes out
//!
//! Drains parsed packet containers on a dedicated thread and feeds the
//! jitter buffer. Locks onto the first stream id it sees and drops
//! packets from other streams (multi-stream mixing is out of scope).
//! The audio device pulls from the jitter buffer on its own schedule;
//! this pipeline never knows when reads happen.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, trace};

use crate::audio::jitter::SharedJitterBuffer;
use crate::error::NetworkError;
use crate::network::udp::PacketContainer;

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    foreign_stream: AtomicU64,
}

/// Receiver pipeline statistics (snapshot)
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub forwarded: u64,
    pub foreign_stream: u64,
}

pub struct RtpReceiver {
    jitter: SharedJitterBuffer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl RtpReceiver {
    pub fn new(jitter: SharedJitterBuffer) -> Self {
        Self {
            jitter,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start draining `delivery` into the jitter buffer. Runs until
    /// [`stop`](Self::stop) or the channel disconnects.
    pub fn start(&mut self, delivery: Receiver<PacketContainer>) -> Result<(), NetworkError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let running = self.running.clone();
        let jitter = self.jitter.clone();
        let counters = self.counters.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("rtp-receive".to_string())
            .spawn(move || {
                let mut locked_stream: Option<u32> = None;
                while running.load(Ordering::Relaxed) {
                    match delivery.recv_timeout(Duration::from_millis(250)) {
                        Ok(container) => {
                            let stream_id = container.packet.stream_id;
                            let accept = match locked_stream {
                                None => {
                                    info!(stream_id, "Locked onto stream");
                                    locked_stream = Some(stream_id);
                                    true
                                }
                                Some(locked) => locked == stream_id,
                            };

                            if accept {
                                jitter.lock().write(container.packet);
                                counters.forwarded.fetch_add(1, Ordering::Relaxed);
                            } else {
                                counters.foreign_stream.fetch_add(1, Ordering::Relaxed);
                                trace!(stream_id, "Dropping packet from foreign stream");
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            foreign_stream: self.counters.foreign_stream.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::jitter::{create_shared, JitterConfig};
    use crate::codec::{CodecRegistry, G711uLaw, Codec, PAYLOAD_TYPE_ULAW};
    use crate::protocol::RtpPacket;
    use bytes::Bytes;
    use crossbeam_channel::bounded;

    fn container(stream_id: u32, seq: u16, timestamp: u32) -> PacketContainer {
        let mut codec = G711uLaw::new();
        let pcm = vec![500i16; 480];
        let mut encoded = vec![0u8; 480];
        codec.encode(&pcm, &mut encoded).unwrap();

        PacketContainer {
            endpoint: "127.0.0.1:19000".parse().unwrap(),
            packet: RtpPacket {
                stream_id,
                payload_type: PAYLOAD_TYPE_ULAW,
                marker: seq == 0,
                sequence_number: seq,
                timestamp,
                payload: Bytes::from(encoded),
            },
        }
    }

    #[test]
    fn forwards_matching_stream_and_drops_foreign() {
        let jitter = create_shared(JitterConfig::default(), CodecRegistry::with_defaults());
        let mut receiver = RtpReceiver::new(jitter.clone());
        let (tx, rx) = bounded::<PacketContainer>(16);
        receiver.start(rx).unwrap();

        tx.send(container(1, 0, 0)).unwrap();
        tx.send(container(2, 0, 0)).unwrap(); // foreign stream
        tx.send(container(1, 1, 480)).unwrap();

        // Give the drain thread time to process
        std::thread::sleep(Duration::from_millis(100));
        receiver.stop();

        let stats = receiver.stats();
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.foreign_stream, 1);
        assert_eq!(jitter.lock().stats().received, 2);
    }

    #[test]
    fn stop_terminates_drain_thread() {
        let jitter = create_shared(JitterConfig::default(), CodecRegistry::with_defaults());
        let mut receiver = RtpReceiver::new(jitter);
        let (_tx, rx) = bounded::<PacketContainer>(16);
        receiver.start(rx).unwrap();
        receiver.stop();
        assert!(receiver.thread_handle.is_none());
    }
}
