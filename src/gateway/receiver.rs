//! The inbound media loop: UDP → RTP → secretbox → Opus → subscriber
//! events. Individual packet failures never terminate the loop; only
//! cancellation does, since the stream is lossy by nature.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::codec::OpusDecoder;
use crate::common::errors::VoiceResult;
use crate::crypto::SecretBox;
use crate::events::{VoiceEvent, resolve_user};
use crate::gateway::ConnectionContext;
use crate::gateway::constants::{RECEIVE_FRAME_MS, VOICE_PACKET_MAX};
use crate::rtp;
use crate::transport::UdpLink;

pub(crate) fn spawn_receiver(
    ctx: Arc<ConnectionContext>,
    udp: Arc<UdpLink>,
    secret: Arc<SecretBox>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut decoder = match OpusDecoder::new() {
            Ok(decoder) => decoder,
            Err(e) => {
                error!(guild_id = ctx.server.guild_id, "receive decoder init failed: {e}");
                return;
            }
        };

        let mut buf = [0u8; VOICE_PACKET_MAX];
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                received = udp.recv(&mut buf) => {
                    let n = match received {
                        Ok(n) => n,
                        Err(e) => {
                            warn!(guild_id = ctx.server.guild_id, "voice UDP receive error: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = handle_packet(&ctx, &secret, &mut decoder, &buf[..n]).await {
                        trace!(guild_id = ctx.server.guild_id, "dropped inbound packet: {e}");
                    }
                }
            }
        }
    })
}

async fn handle_packet(
    ctx: &ConnectionContext,
    secret: &SecretBox,
    decoder: &mut OpusDecoder,
    packet: &[u8],
) -> VoiceResult<()> {
    let parsed = rtp::parse_header(packet)?;
    let mut header = [0u8; rtp::HEADER_LEN];
    header.copy_from_slice(&packet[..rtp::HEADER_LEN]);

    let plaintext = secret.open(&packet[rtp::HEADER_LEN..], &rtp::make_nonce(&header))?;
    let offset = rtp::payload_offset(&plaintext, parsed.has_extension)?;
    let pcm = decoder.decode(&plaintext[offset..])?;

    // Copy the id out before awaiting; the map shard must not stay locked.
    let user_id = ctx.ssrc_users.get(&parsed.ssrc).map(|entry| *entry.value());
    let user = match user_id {
        Some(user_id) => {
            Some(resolve_user(ctx.cache.as_deref(), ctx.server.guild_id, user_id).await)
        }
        None => None,
    };

    ctx.events.emit(VoiceEvent::VoiceReceived {
        ssrc: parsed.ssrc,
        pcm,
        frame_ms: RECEIVE_FRAME_MS,
        user,
    });
    Ok(())
}
