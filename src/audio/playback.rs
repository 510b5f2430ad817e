//! Audio playback fed from the jitter buffer
//!
//! Runs the cpal output stream on a dedicated thread. Each render
//! callback pulls exactly the requested sample count from the jitter
//! buffer, which always delivers (decoded, concealed, or silent), so
//! the device never underruns on network trouble.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};

use crate::audio::device::get_device_by_id;
use crate::audio::jitter::SharedJitterBuffer;
use crate::error::AudioError;

pub struct AudioPlayback {
    device_id: String,
    jitter: SharedJitterBuffer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    samples_rendered: Arc<AtomicU64>,
    config: StreamConfig,
}

impl AudioPlayback {
    pub fn new(
        device_id: &str,
        sample_rate: u32,
        channels: u16,
        desired_latency_ms: u32,
        jitter: SharedJitterBuffer,
    ) -> Result<Self, AudioError> {
        let _ = get_device_by_id(device_id)?;

        let latency_frames = sample_rate * desired_latency_ms / crate::constants::MS_IN_SECOND;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(latency_frames),
        };

        Ok(Self {
            device_id: device_id.to_string(),
            jitter,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            samples_rendered: Arc::new(AtomicU64::new(0)),
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
        let jitter = self.jitter.clone();
        let samples_rendered = self.samples_rendered.clone();
        let config = self.config.clone();
        let channels = self.config.channels.max(1) as usize;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                // Mono pull buffer, reused across callbacks
                let mut scratch: Vec<i16> = Vec::new();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = data.len() / channels;
                        if !running.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }

                        scratch.resize(frames, 0);
                        jitter.lock().read(&mut scratch);
                        samples_rendered.fetch_add(frames as u64, Ordering::Relaxed);

                        // The stream is mono; replicate across device
                        // channels
                        for (frame, out) in scratch.iter().zip(data.chunks_mut(channels)) {
                            let value = f32::from(*frame) / f32::from(i16::MAX);
                            out.fill(value);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output stream: {}", e);
                            return;
                        }
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
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

    pub fn samples_rendered(&self) -> u64 {
        self.samples_rendered.load(Ordering::Relaxed)
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
