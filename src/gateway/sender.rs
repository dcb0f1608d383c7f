//! The paced send path: PCM → Opus → secretbox → RTP → UDP, one frame at
//! a time behind the connection's single-permit send token.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::codec::OpusEncoder;
use crate::common::errors::{VoiceError, VoiceResult};
use crate::crypto::SecretBox;
use crate::gateway::ConnectionContext;
use crate::gateway::constants::{FRAME_STEP_MS, OP_SPEAKING, TICKS_PER_MS};
use crate::gateway::types::speaking_payload;
use crate::rtp;
use crate::transport::UdpLink;

/// Outbound media state; lives behind the send token, so the cursor and
/// pacing anchor can only change while a caller holds the permit.
pub(crate) struct SendState {
    encoder: OpusEncoder,
    cursor: MediaCursor,
    anchor: Option<Instant>,
    speaking: bool,
}

/// Running sequence number and RTP timestamp of the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MediaCursor {
    pub sequence: u16,
    pub timestamp: u32,
}

impl MediaCursor {
    /// Sequence wraps modulo 2^16; the timestamp advances by 48 ticks per
    /// millisecond of audio.
    fn advance(&mut self, block_ms: u32) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(TICKS_PER_MS * block_ms);
    }
}

impl SendState {
    pub fn new(encoder: OpusEncoder) -> Self {
        Self {
            encoder,
            cursor: MediaCursor {
                sequence: 0,
                timestamp: 0,
            },
            anchor: None,
            speaking: false,
        }
    }
}

/// Transmits one paced frame. Fails with `NotInitialized` before the
/// session key has been processed.
pub(crate) async fn send_frame(
    ctx: &Arc<ConnectionContext>,
    pcm: &[u8],
    block_ms: u32,
    bitrate_kbps: u32,
) -> VoiceResult<()> {
    let (secret, udp) = media_handles(ctx)?;
    let ssrc = ctx.ssrc.load(Ordering::Acquire);

    let mut state = ctx.send.lock().await;

    let anchor = match state.anchor {
        Some(anchor) => anchor,
        None => {
            let now = Instant::now();
            state.anchor = Some(now);
            now
        }
    };

    let header = rtp::build_header(state.cursor.sequence, state.cursor.timestamp, ssrc);
    let opus = state.encoder.encode(pcm, bitrate_kbps)?;
    let ciphertext = secret.seal(&opus, &rtp::make_nonce(&header))?;
    let packet = rtp::frame_packet(&header, &ciphertext);

    if !state.speaking {
        ctx.send_gateway(OP_SPEAKING, speaking_payload(true, ssrc));
        let _ = ctx.playing.send(true);
        state.speaking = true;
    }

    udp.send(&packet).await?;
    state.cursor.advance(block_ms);

    // Spin to the frame boundary: OS sleep granularity cannot hold the
    // 20 ms cadence at sub-millisecond jitter.
    let target = anchor + Duration::from_millis(FRAME_STEP_MS);
    while Instant::now() < target {
        std::hint::spin_loop();
    }
    state.anchor = Some(target);

    Ok(())
}

/// Announces the speaking state. `false` resets the pacing anchor and
/// completes the playback signal, so the next send starts a fresh epoch.
pub(crate) async fn send_speaking(ctx: &Arc<ConnectionContext>, speaking: bool) -> VoiceResult<()> {
    if !*ctx.ready.borrow() {
        return Err(VoiceError::NotInitialized);
    }
    let ssrc = ctx.ssrc.load(Ordering::Acquire);

    // Serialise behind the send token so a speaking change can never
    // interleave with an in-flight frame.
    let mut state = ctx.send.lock().await;
    ctx.send_gateway(OP_SPEAKING, speaking_payload(speaking, ssrc));
    state.speaking = speaking;
    if speaking {
        let _ = ctx.playing.send(true);
    } else {
        state.anchor = None;
        let _ = ctx.playing.send(false);
    }
    Ok(())
}

fn media_handles(ctx: &ConnectionContext) -> VoiceResult<(Arc<SecretBox>, Arc<UdpLink>)> {
    if !*ctx.ready.borrow() {
        return Err(VoiceError::NotInitialized);
    }
    let secret = ctx
        .secret
        .read()
        .clone()
        .ok_or(VoiceError::NotInitialized)?;
    let udp = ctx.udp.read().clone().ok_or(VoiceError::NotInitialized)?;
    Ok((secret, udp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioProfile;

    #[test]
    fn frame_pipeline_layout() {
        let mut encoder = OpusEncoder::new(AudioProfile::Audio).unwrap();
        let secret = SecretBox::new(core::array::from_fn(|i| i as u8));

        // 20 ms of 48 kHz stereo s16le.
        let pcm = vec![0u8; 3840];
        let header = rtp::build_header(5, 1000, 42);
        let opus = encoder.encode(&pcm, 16).unwrap();
        let ciphertext = secret.seal(&opus, &rtp::make_nonce(&header)).unwrap();
        let packet = rtp::frame_packet(&header, &ciphertext);

        assert_eq!(&packet[..2], &[0x80, 0x78]);
        assert_eq!(&packet[8..12], &42u32.to_be_bytes());
        assert_eq!(packet.len(), 12 + opus.len() + 16);

        // The payload opens back to the Opus packet under the header nonce.
        let opened = secret
            .open(&packet[12..], &rtp::make_nonce(&header))
            .unwrap();
        assert_eq!(opened, opus);
    }

    #[test]
    fn cursor_advances_by_block() {
        let mut cursor = MediaCursor {
            sequence: 10,
            timestamp: 1000,
        };
        cursor.advance(20);
        assert_eq!(cursor.sequence, 11);
        assert_eq!(cursor.timestamp, 1000 + 960);

        cursor.advance(40);
        assert_eq!(cursor.sequence, 12);
        assert_eq!(cursor.timestamp, 1000 + 960 + 1920);
    }

    #[test]
    fn sequence_wraps_modulo_u16() {
        let mut cursor = MediaCursor {
            sequence: u16::MAX,
            timestamp: u32::MAX - 100,
        };
        cursor.advance(20);
        assert_eq!(cursor.sequence, 0);
        assert_eq!(cursor.timestamp, (u32::MAX - 100).wrapping_add(960));
    }
}
