//! Configuration surface
//!
//! Plain scalar parameters with defaults, optionally overridden by a
//! TOML file in the platform config directory. No runtime state is
//! persisted.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::audio::jitter::{JitterConfig, OverflowPolicy};
use crate::codec::CodecParams;
use crate::constants;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub stream: StreamConfig,
    pub playout: PlayoutConfig,
    pub devices: DeviceConfig,
}

/// Socket parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Remote endpoint the sender transmits to
    pub remote: String,
    /// Local port the receiver listens on
    pub port: u16,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            remote: format!("127.0.0.1:{}", constants::DEFAULT_UDP_PORT),
            port: constants::DEFAULT_UDP_PORT,
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        }
    }
}

/// Stream identity and framing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stream_id: u32,
    pub payload_type: u8,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
    /// Loss hint for FEC-capable encoders (percent)
    pub expected_loss_perc: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_id: 1,
            payload_type: crate::codec::PAYLOAD_TYPE_OPUS,
            sample_rate: constants::DEFAULT_SAMPLE_RATE,
            channels: constants::DEFAULT_CHANNELS,
            frame_duration_ms: constants::DEFAULT_FRAME_DURATION_MS,
            expected_loss_perc: 30,
        }
    }
}

impl StreamConfig {
    /// Nominal samples per frame at the stream rate
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate * self.frame_duration_ms / constants::MS_IN_SECOND) as usize
    }
}

/// Receiver playout parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    /// Jitter window depth: latency traded for loss/jitter tolerance
    pub jitter_depth_ms: u32,
    /// Buffer size requested from the output device
    pub desired_latency_ms: u32,
    pub overflow_policy: OverflowPolicy,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            jitter_depth_ms: constants::DEFAULT_JITTER_DEPTH_MS,
            desired_latency_ms: constants::DEFAULT_LATENCY_MS,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Device selection; `None` means the system default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub input: Option<String>,
    pub output: Option<String>,
}

impl AppConfig {
    /// Load from the platform config directory if a file exists,
    /// defaults otherwise.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(dirs) = ProjectDirs::from("", "", "audiocast") {
            let path = dirs.config_dir().join("config.toml");
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn remote_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.network
            .remote
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.network.remote.clone()))
    }

    pub fn jitter_config(&self) -> JitterConfig {
        JitterConfig {
            sample_rate: self.stream.sample_rate,
            channels: self.stream.channels,
            frame_samples: self.stream.frame_samples(),
            depth_ms: self.playout.jitter_depth_ms,
            overflow_policy: self.playout.overflow_policy,
            expected_loss_perc: self.stream.expected_loss_perc,
        }
    }

    pub fn codec_params(&self) -> CodecParams {
        CodecParams {
            sample_rate: self.stream.sample_rate,
            channels: self.stream.channels,
            frame_samples: self.stream.frame_samples(),
            expected_loss_perc: self.stream.expected_loss_perc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_parameters() {
        let config = AppConfig::default();
        assert_eq!(config.stream.sample_rate, 8000);
        assert_eq!(config.stream.frame_samples(), 480);
        assert_eq!(config.playout.jitter_depth_ms, 120);
        assert!(config.remote_addr().is_ok());
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [stream]
            payload_type = 0
            frame_duration_ms = 20

            [playout]
            overflow_policy = "auto_resync"
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.payload_type, 0);
        assert_eq!(config.stream.frame_samples(), 160);
        assert_eq!(config.playout.overflow_policy, OverflowPolicy::AutoResync);
        // Untouched sections keep defaults
        assert_eq!(config.network.port, 19000);
    }

    #[test]
    fn bad_remote_address_is_reported() {
        let mut config = AppConfig::default();
        config.network.remote = "not-an-endpoint".to_string();
        assert!(matches!(
            config.remote_addr(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }
}
