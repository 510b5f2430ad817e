//! Lock-free ring buffer between the capture callback and the encode
//! loop
//!
//! Single-producer single-consumer: the cpal input callback pushes,
//! the sender pipeline pops. Overflow drops the newest frame rather
//! than blocking the audio thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

/// One block of captured PCM as delivered by the input device
#[derive(Clone)]
pub struct PcmFrame {
    /// Interleaved i16 samples
    pub samples: Vec<i16>,
    pub channels: u16,
    /// Capture timestamp in microseconds since stream start
    pub timestamp_us: u64,
    /// Callback sequence number
    pub sequence: u32,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>, channels: u16, timestamp_us: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            timestamp_us,
            sequence,
        }
    }

    /// Number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// SPSC ring buffer for captured frames
pub struct RingBuffer {
    queue: ArrayQueue<PcmFrame>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame; returns false on overflow
    pub fn push(&self, frame: PcmFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame; counts an underrun when empty
    pub fn pop(&self) -> Option<PcmFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Pop without counting an underrun
    pub fn try_pop(&self) -> Option<PcmFrame> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_in_order() {
        let buffer = RingBuffer::new(4);

        assert!(buffer.push(PcmFrame::new(vec![0; 480], 1, 0, 0)));
        assert!(buffer.push(PcmFrame::new(vec![1; 480], 1, 60_000, 1)));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().unwrap().sequence, 0);
        assert_eq!(buffer.pop().unwrap().sequence, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn overflow_is_counted_not_blocking() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push(PcmFrame::new(vec![], 1, 0, 0)));
        assert!(buffer.push(PcmFrame::new(vec![], 1, 0, 1)));
        assert!(!buffer.push(PcmFrame::new(vec![], 1, 0, 2)));
        assert_eq!(buffer.overflow_count(), 1);
    }

    #[test]
    fn underrun_is_counted_on_pop_only() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.try_pop().is_none());
        assert_eq!(buffer.underrun_count(), 0);
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }
}
