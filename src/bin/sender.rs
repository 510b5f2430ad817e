//! Audio Sender Application
//!
//! Captures audio from an input device, encodes it frame by frame and
//! streams RTP-style packets to the remote receiver over UDP.

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiocast::{
    audio::{buffer::create_shared_buffer, capture::AudioCapture, device::list_devices},
    codec::CodecRegistry,
    config::AppConfig,
    constants::*,
    network::{sender::RtpSender, udp::UdpTransport},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio sender");

    let config = AppConfig::load()?;

    // Remote endpoint: first CLI argument overrides the config file
    let remote: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .map_err(|_| anyhow!("Invalid target address: {}", arg))?,
        None => config.remote_addr()?,
    };
    tracing::info!("Target receiver: {}", remote);

    println!("\n=== Available Input Devices ===");
    let devices = list_devices();
    for device in &devices {
        if device.is_input {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    ID: {}", device.id);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
    }
    println!();

    // Ephemeral local port; the sender only transmits
    let transport = Arc::new(UdpTransport::bind(
        0,
        config.network.recv_buffer_size,
        config.network.send_buffer_size,
    )?);

    let registry = CodecRegistry::with_defaults();
    let codec = registry
        .create(config.stream.payload_type, &config.codec_params())?
        .ok_or_else(|| {
            anyhow!(
                "No codec registered for payload type {}",
                config.stream.payload_type
            )
        })?;

    let frame_samples = config.stream.frame_samples();
    let mut rtp_sender = RtpSender::new(
        transport.clone(),
        remote,
        codec,
        config.stream.payload_type,
        config.stream.stream_id,
        frame_samples,
        config.stream.sample_rate,
    );

    tracing::info!(
        "Stream {}: payload type {}, {} Hz, {} samples/frame ({} ms)",
        config.stream.stream_id,
        config.stream.payload_type,
        config.stream.sample_rate,
        frame_samples,
        config.stream.frame_duration_ms,
    );

    let input_id = config
        .devices
        .input
        .clone()
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.is_input && d.is_default)
                .map(|d| d.id.clone())
        })
        .ok_or_else(|| anyhow!("No input device available"))?;

    let capture_buffer = create_shared_buffer(RING_BUFFER_CAPACITY);
    let mut capture = AudioCapture::new(
        &input_id,
        config.stream.sample_rate,
        config.stream.channels,
        capture_buffer.clone(),
    )?;
    capture.start()?;
    tracing::info!("Audio capture started on {}", input_id);

    let mut sample_buffer: Vec<i16> = Vec::with_capacity(frame_samples * 2);
    let mut last_stats = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!("Streaming - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_micros(500)) => {
                while let Some(frame) = capture_buffer.try_pop() {
                    sample_buffer.extend_from_slice(&frame.samples);

                    while sample_buffer.len() >= frame_samples {
                        let pcm: Vec<i16> = sample_buffer.drain(..frame_samples).collect();
                        if let Err(e) = rtp_sender.send_frame(&pcm) {
                            tracing::warn!("Frame send failed: {}", e);
                        }
                    }
                }

                if let Some(e) = capture.check_errors() {
                    tracing::warn!("Capture error: {}", e);
                }

                if last_stats.elapsed() >= Duration::from_secs(5) {
                    last_stats = Instant::now();
                    let stats = rtp_sender.stats();
                    tracing::info!(
                        "Sender stats: {} frames encoded, {} packets sent, {:.1} KB, {} send failures",
                        stats.frames_encoded,
                        stats.packets_sent,
                        stats.bytes_sent as f64 / 1024.0,
                        stats.send_failures,
                    );
                }
            }
        }
    }

    // Stop the capture first so no further frames queue behind the
    // encoder; the transport closes when it drops.
    capture.stop();
    Ok(())
}
