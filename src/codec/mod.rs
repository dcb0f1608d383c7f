//! Opus codec wrappers operating on 48 kHz stereo, 16-bit little-endian PCM.

use audiopus::coder::{Decoder as OpusCoderDecoder, Encoder as OpusCoderEncoder};
use audiopus::{Bitrate, Channels, SampleRate};

use crate::common::errors::VoiceError;
use crate::config::AudioProfile;

/// Fixed sample rate of the media path.
pub const SAMPLE_RATE: u32 = 48_000;

/// Fixed channel count of the media path.
pub const CHANNELS: usize = 2;

/// Default encode bitrate in kbps.
pub const DEFAULT_BITRATE_KBPS: u32 = 16;

/// Max encoded packet size; generous for every supported frame length.
const MAX_OPUS_PACKET: usize = 4000;

/// Max decoded samples per channel (120 ms at 48 kHz).
const MAX_FRAME_SAMPLES: usize = 5760;

/// Per-channel sample counts of the supported frame sizes
/// (2.5, 5, 10, 20, 40, 60 ms).
const SUPPORTED_FRAME_SAMPLES: [usize; 6] = [120, 240, 480, 960, 1920, 2880];

/// Encodes interleaved PCM bytes to Opus packets.
pub struct OpusEncoder {
    encoder: OpusCoderEncoder,
    bitrate_kbps: u32,
}

impl OpusEncoder {
    pub fn new(profile: AudioProfile) -> Result<Self, VoiceError> {
        let mut encoder =
            OpusCoderEncoder::new(SampleRate::Hz48000, Channels::Stereo, profile.to_opus())
                .map_err(codec_err)?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(DEFAULT_BITRATE_KBPS as i32 * 1000))
            .map_err(codec_err)?;

        Ok(Self {
            encoder,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        })
    }

    /// Encodes one frame of little-endian PCM bytes at `bitrate_kbps`.
    ///
    /// The sample count must match one of the supported frame lengths.
    pub fn encode(&mut self, pcm: &[u8], bitrate_kbps: u32) -> Result<Vec<u8>, VoiceError> {
        let samples = pcm_to_samples(pcm)?;
        if !SUPPORTED_FRAME_SAMPLES.contains(&(samples.len() / CHANNELS)) {
            return Err(VoiceError::CodecFailure(format!(
                "unsupported frame size: {} samples per channel",
                samples.len() / CHANNELS
            )));
        }

        if bitrate_kbps != self.bitrate_kbps {
            self.encoder
                .set_bitrate(Bitrate::BitsPerSecond(bitrate_kbps as i32 * 1000))
                .map_err(codec_err)?;
            self.bitrate_kbps = bitrate_kbps;
        }

        let mut output = vec![0u8; MAX_OPUS_PACKET];
        let written = self.encoder.encode(&samples, &mut output).map_err(codec_err)?;
        output.truncate(written);
        Ok(output)
    }
}

/// Decodes Opus packets back to interleaved little-endian PCM bytes.
pub struct OpusDecoder {
    decoder: OpusCoderDecoder,
    /// Reusable interleaved scratch buffer.
    pcm: Vec<i16>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, VoiceError> {
        let decoder =
            OpusCoderDecoder::new(SampleRate::Hz48000, Channels::Stereo).map_err(codec_err)?;
        Ok(Self {
            decoder,
            pcm: vec![0i16; MAX_FRAME_SAMPLES * CHANNELS],
        })
    }

    /// Decodes one packet; a 20 ms frame is the expected case.
    pub fn decode(&mut self, opus: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let samples = self
            .decoder
            .decode(Some(opus), self.pcm.as_mut_slice(), false)
            .map_err(codec_err)?;

        Ok(samples_to_pcm(&self.pcm[..samples * CHANNELS]))
    }
}

fn pcm_to_samples(pcm: &[u8]) -> Result<Vec<i16>, VoiceError> {
    if pcm.len() % 2 != 0 {
        return Err(VoiceError::CodecFailure(
            "PCM byte length must be a multiple of 2".into(),
        ));
    }
    Ok(pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn codec_err<E: std::fmt::Display>(e: E) -> VoiceError {
    VoiceError::CodecFailure(e.to_string())
}
