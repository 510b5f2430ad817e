//! Codec abstraction and payload-type registry
//!
//! A [`Codec`] is a stateful encoder/decoder bound to one stream
//! direction. Decode and conceal calls on an instance must be
//! sequential because predictive decoder state depends on call order;
//! the `&mut self` receivers make that a compile-time property.
//!
//! The [`CodecRegistry`] maps RTP payload types to codec factories so
//! new codecs need no change to dispatch logic.

pub mod g711;
pub mod opus;

pub use g711::{G711aLaw, G711uLaw};
pub use opus::OpusCodec;

use std::collections::HashMap;

use crate::error::CodecError;

/// Static payload type for G.711 µ-law
pub const PAYLOAD_TYPE_ULAW: u8 = 0;

/// Static payload type for G.711 A-law
pub const PAYLOAD_TYPE_ALAW: u8 = 8;

/// Dynamic payload type used for Opus
pub const PAYLOAD_TYPE_OPUS: u8 = 101;

/// Stream parameters a factory needs to build a codec instance
#[derive(Debug, Clone)]
pub struct CodecParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Nominal samples per frame at `sample_rate`
    pub frame_samples: usize,
    /// Expected network loss hint for FEC-capable encoders (percent)
    pub expected_loss_perc: u8,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channels: crate::constants::DEFAULT_CHANNELS,
            frame_samples: (crate::constants::DEFAULT_SAMPLE_RATE
                / crate::constants::MS_IN_SECOND
                * crate::constants::DEFAULT_FRAME_DURATION_MS) as usize,
            expected_loss_perc: 30,
        }
    }
}

/// Capability set shared by all audio codecs
pub trait Codec: Send {
    /// How many PCM samples the given payload will decode to, without
    /// decoding it. Used to size output buffers and validate frames.
    fn probe_sample_count(&self, encoded: &[u8]) -> Result<usize, CodecError>;

    /// Decode a payload into `out`. Returns the number of samples
    /// written.
    fn decode(&mut self, encoded: &[u8], out: &mut [i16]) -> Result<usize, CodecError>;

    /// Synthesize a plausible continuation for a lost frame from
    /// decoder-internal state only. Returns the number of samples
    /// written; fills `out` completely.
    fn conceal(&mut self, out: &mut [i16]) -> Result<usize, CodecError>;

    /// Encode one PCM frame into `out`. Returns the encoded byte count.
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError>;
}

/// Factory producing a codec instance for one stream direction
pub type CodecFactory = fn(&CodecParams) -> Result<Box<dyn Codec>, CodecError>;

/// Maps payload types to codec factories. Registration is static
/// configuration; lookups never fail the session, an unknown payload
/// type simply yields no codec.
#[derive(Default)]
pub struct CodecRegistry {
    factories: HashMap<u8, CodecFactory>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard set: PT 0 µ-law, PT 8
    /// A-law, PT 101 Opus.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PAYLOAD_TYPE_ULAW, make_ulaw);
        registry.register(PAYLOAD_TYPE_ALAW, make_alaw);
        registry.register(PAYLOAD_TYPE_OPUS, make_opus);
        registry
    }

    pub fn register(&mut self, payload_type: u8, factory: CodecFactory) {
        self.factories.insert(payload_type, factory);
    }

    /// Build a codec for `payload_type`. `Ok(None)` means the type is
    /// unknown and the caller should mute that stream rather than fail.
    pub fn create(
        &self,
        payload_type: u8,
        params: &CodecParams,
    ) -> Result<Option<Box<dyn Codec>>, CodecError> {
        match self.factories.get(&payload_type) {
            Some(factory) => factory(params).map(Some),
            None => Ok(None),
        }
    }

    pub fn is_registered(&self, payload_type: u8) -> bool {
        self.factories.contains_key(&payload_type)
    }
}

fn make_ulaw(_params: &CodecParams) -> Result<Box<dyn Codec>, CodecError> {
    Ok(Box::new(G711uLaw::new()))
}

fn make_alaw(_params: &CodecParams) -> Result<Box<dyn Codec>, CodecError> {
    Ok(Box::new(G711aLaw::new()))
}

fn make_opus(params: &CodecParams) -> Result<Box<dyn Codec>, CodecError> {
    Ok(Box::new(OpusCodec::new(params)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_standard_types() {
        let registry = CodecRegistry::with_defaults();
        assert!(registry.is_registered(PAYLOAD_TYPE_ULAW));
        assert!(registry.is_registered(PAYLOAD_TYPE_ALAW));
        assert!(registry.is_registered(PAYLOAD_TYPE_OPUS));

        let params = CodecParams::default();
        let codec = registry.create(PAYLOAD_TYPE_ULAW, &params).unwrap();
        assert!(codec.is_some());
    }

    #[test]
    fn unknown_payload_type_yields_no_codec() {
        let registry = CodecRegistry::with_defaults();
        let params = CodecParams::default();
        assert!(registry.create(42, &params).unwrap().is_none());
    }

    #[test]
    fn registration_is_open_for_extension() {
        let mut registry = CodecRegistry::new();
        assert!(!registry.is_registered(96));
        registry.register(96, |_| Ok(Box::new(G711uLaw::new())));
        assert!(registry.is_registered(96));
    }
}
