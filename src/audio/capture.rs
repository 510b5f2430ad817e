//! Audio capture from the input device
//!
//! Runs the cpal input stream on a dedicated thread and pushes
//! captured frames into an SPSC ring for the encode loop. The callback
//! never blocks: a full ring drops the frame and counts it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};

use crate::audio::buffer::{PcmFrame, SharedRingBuffer};
use crate::audio::device::get_device_by_id;
use crate::error::AudioError;

pub struct AudioCapture {
    device_id: String,
    running: Arc<AtomicBool>,
    output_buffer: SharedRingBuffer,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    sequence: Arc<AtomicU32>,
    samples_captured: Arc<AtomicU64>,
    config: StreamConfig,
}

impl AudioCapture {
    pub fn new(
        device_id: &str,
        sample_rate: u32,
        channels: u16,
        output_buffer: SharedRingBuffer,
    ) -> Result<Self, AudioError> {
        // Fail early if the device does not exist
        let _ = get_device_by_id(device_id)?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device_id: device_id.to_string(),
            running: Arc::new(AtomicBool::new(false)),
            output_buffer,
            thread_handle: None,
            error_rx: None,
            sequence: Arc::new(AtomicU32::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_device_by_id(&self.device_id)?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let output_buffer = self.output_buffer.clone();
        let sequence = self.sequence.clone();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();
        let channels = self.config.channels;

        self.sequence.store(0, Ordering::SeqCst);
        self.samples_captured.store(0, Ordering::SeqCst);
        let start_time = Instant::now();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        let timestamp_us = start_time.elapsed().as_micros() as u64;
                        let seq = sequence.fetch_add(1, Ordering::Relaxed);
                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);

                        let samples: Vec<i16> = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();

                        // May drop on overflow; the ring counts it
                        let _ = output_buffer.push(PcmFrame::new(samples, channels, timestamp_us, seq));
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start input stream: {}", e);
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                        // Stream drops here, stopping capture
                    }
                    Err(e) => {
                        tracing::error!("Failed to build input stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Drain one pending stream error, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
