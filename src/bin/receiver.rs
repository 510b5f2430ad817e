//! Audio Receiver Application
//!
//! Receives an RTP-style audio stream over UDP, absorbs network jitter
//! and loss in the playout buffer, and renders continuous PCM to an
//! output device.

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiocast::{
    audio::{device::list_devices, jitter::create_shared, playback::AudioPlayback},
    codec::CodecRegistry,
    config::AppConfig,
    network::{receiver::RtpReceiver, udp::UdpTransport, PacketContainer},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio receiver");

    let config = AppConfig::load()?;

    // Listen port: first CLI argument overrides the config file
    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().map_err(|_| anyhow!("Invalid port: {}", arg))?,
        None => config.network.port,
    };

    println!("\n=== Available Output Devices ===");
    let devices = list_devices();
    for device in &devices {
        if device.is_output {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    ID: {}", device.id);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
    }
    println!();

    let (packet_tx, packet_rx) = bounded::<PacketContainer>(4096);

    let mut transport = UdpTransport::bind(
        port,
        config.network.recv_buffer_size,
        config.network.send_buffer_size,
    )?;
    transport.start(packet_tx)?;
    tracing::info!("Listening on UDP port {}", port);

    let jitter = create_shared(config.jitter_config(), CodecRegistry::with_defaults());
    tracing::info!(
        "Jitter buffer: {} ms depth ({} samples), {:?} overflow policy",
        config.playout.jitter_depth_ms,
        jitter.lock().window_samples(),
        config.playout.overflow_policy,
    );

    let mut receiver = RtpReceiver::new(jitter.clone());
    receiver.start(packet_rx)?;

    let output_id = config
        .devices
        .output
        .clone()
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.is_output && d.is_default)
                .map(|d| d.id.clone())
        })
        .ok_or_else(|| anyhow!("No output device available"))?;

    let mut playback = AudioPlayback::new(
        &output_id,
        config.stream.sample_rate,
        config.stream.channels,
        config.playout.desired_latency_ms,
        jitter.clone(),
    )?;
    playback.start()?;
    tracing::info!("Playback started on {}", output_id);

    let mut last_stats = Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!("Waiting for audio stream - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if let Some(e) = playback.check_errors() {
                    tracing::warn!("Playback error: {}", e);
                }

                if last_stats.elapsed() >= Duration::from_secs(5) {
                    last_stats = Instant::now();

                    let transport_stats = transport.stats();
                    tracing::info!(
                        "Transport: {} packets, {:.1} KB, {} invalid, {} dropped",
                        transport_stats.packets_received,
                        transport_stats.bytes_received as f64 / 1024.0,
                        transport_stats.invalid_packets,
                        transport_stats.dropped,
                    );

                    let jitter_stats = jitter.lock().stats();
                    tracing::info!(
                        "Playout: {} received, {} concealed ({:.1}% loss), {} late, {} overflow, {} buffered",
                        jitter_stats.received,
                        jitter_stats.concealed,
                        jitter_stats.loss_rate() * 100.0,
                        jitter_stats.late,
                        jitter_stats.overflow,
                        jitter_stats.buffered,
                    );
                }
            }
        }
    }

    // Teardown order matters: stop the transport listener first, then
    // the drain thread, then detach the reader. No write can occur
    // after the playback side is gone.
    transport.stop();
    receiver.stop();
    playback.stop();
    Ok(())
}
