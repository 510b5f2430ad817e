//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod jitter;
pub mod playback;

pub use buffer::{create_shared_buffer, PcmFrame, RingBuffer, SharedRingBuffer};
pub use capture::AudioCapture;
pub use device::{get_device_by_id, list_devices, AudioDevice, DeviceInfo};
pub use jitter::{create_shared, JitterBuffer, JitterConfig, OverflowPolicy, SharedJitterBuffer};
pub use playback::AudioPlayback;
