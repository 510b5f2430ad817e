//! Opus codec with in-band FEC
//!
//! Wraps one `opus::Encoder` + `opus::Decoder` pair for a single stream
//! direction. The encoder is configured for VoIP with in-band forward
//! error correction and an expected-loss hint, so the decoder's
//! concealment path can exploit redundant information from neighboring
//! frames instead of extrapolating blindly.

use opus::{Application, Channels, Decoder, Encoder};

use crate::codec::{Codec, CodecParams};
use crate::error::CodecError;

pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
    channels: u16,
}

impl OpusCodec {
    pub fn new(params: &CodecParams) -> Result<Self, CodecError> {
        let channels = match params.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    other
                )))
            }
        };

        let mut encoder = Encoder::new(params.sample_rate, channels, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;
        encoder
            .set_inband_fec(true)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;
        encoder
            .set_packet_loss_perc(i32::from(params.expected_loss_perc))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;

        let decoder = Decoder::new(params.sample_rate, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            encoder,
            decoder,
            channels: params.channels,
        })
    }
}

impl Codec for OpusCodec {
    fn probe_sample_count(&self, encoded: &[u8]) -> Result<usize, CodecError> {
        self.decoder
            .get_nb_samples(encoded)
            .map(|per_channel| per_channel * self.channels as usize)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))
    }

    fn decode(&mut self, encoded: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        self.decoder
            .decode(encoded, out, false)
            .map(|per_channel| per_channel * self.channels as usize)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))
    }

    fn conceal(&mut self, out: &mut [i16]) -> Result<usize, CodecError> {
        // Empty input runs the decoder's packet loss concealment for
        // one output frame of out.len() samples.
        self.decoder
            .decode(&[], out, false)
            .map(|per_channel| per_channel * self.channels as usize)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))
    }

    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        self.encoder
            .encode(pcm, out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CodecParams {
        CodecParams::default()
    }

    #[test]
    fn codec_creation() {
        assert!(OpusCodec::new(&params()).is_ok());
    }

    #[test]
    fn rejects_unsupported_channel_count() {
        let bad = CodecParams {
            channels: 6,
            ..params()
        };
        assert!(OpusCodec::new(&bad).is_err());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = OpusCodec::new(&params()).unwrap();
        let frame_samples = params().frame_samples;

        let pcm: Vec<i16> = (0..frame_samples)
            .map(|i| {
                let t = i as f32 / 8000.0;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let mut encoded = vec![0u8; 4000];
        let n = codec.encode(&pcm, &mut encoded).unwrap();
        assert!(n > 0);
        assert!(n < pcm.len() * 2); // compressed

        assert_eq!(codec.probe_sample_count(&encoded[..n]).unwrap(), frame_samples);

        let mut decoded = vec![0i16; frame_samples];
        let samples = codec.decode(&encoded[..n], &mut decoded).unwrap();
        assert_eq!(samples, frame_samples);
    }

    #[test]
    fn conceal_produces_full_frame() {
        let mut codec = OpusCodec::new(&params()).unwrap();
        let frame_samples = params().frame_samples;

        let mut out = vec![0i16; frame_samples];
        let samples = codec.conceal(&mut out).unwrap();
        assert_eq!(samples, frame_samples);
    }
}
