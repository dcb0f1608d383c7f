//! Per-session signalling dispatch: one `SessionState` per WebSocket
//! session, consuming ops 0–9 and driving the handshake to ready.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::ConnectionContext;
use super::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_IDENTIFY,
    OP_INVALID_SESSION, OP_READY, OP_RESUME, OP_SELECT_PROTOCOL, OP_SESSION_DESCRIPTION,
    OP_SPEAKING, RECONNECT_DELAY_FRESH_MS,
};
use super::discovery;
use super::heartbeat::spawn_heartbeat;
use super::receiver::spawn_receiver;
use super::types::{
    ConnectionStage, GatewayMessage, SessionOutcome, identify_payload, parse_secret_key,
    resume_payload, select_protocol_payload,
};
use crate::common::utils::now_ms;
use crate::crypto::SecretBox;
use crate::events::{VoiceEvent, resolve_user};
use crate::transport::UdpLink;

pub(crate) struct SessionState<'a> {
    ctx: &'a Arc<ConnectionContext>,
    tx: UnboundedSender<String>,
    stage: ConnectionStage,
    udp: Option<Arc<UdpLink>>,
    heartbeat: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl<'a> SessionState<'a> {
    pub fn new(ctx: &'a Arc<ConnectionContext>, tx: UnboundedSender<String>) -> Self {
        Self {
            ctx,
            tx,
            stage: ConnectionStage::Connecting,
            udp: None,
            heartbeat: None,
            receiver: None,
        }
    }

    /// Socket is open: send identify (or resume) and await the ready message.
    pub fn identify(&mut self, resume: bool) {
        if resume {
            self.stage = ConnectionStage::Resuming;
            self.send_json(
                OP_RESUME,
                resume_payload(&self.ctx.server, &self.ctx.state),
            );
        } else {
            self.stage = ConnectionStage::Identifying;
            self.send_json(
                OP_IDENTIFY,
                identify_payload(&self.ctx.server, &self.ctx.state),
            );
        }
        self.stage = ConnectionStage::AwaitingReady;
    }

    pub async fn handle_text(&mut self, text: &str) -> Option<SessionOutcome> {
        let msg: GatewayMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    guild_id = self.ctx.server.guild_id,
                    "failed to parse voice gateway message: {e} - text: {text}"
                );
                return None;
            }
        };

        match msg.op {
            OP_READY => self.handle_ready(msg.d).await,
            OP_SESSION_DESCRIPTION => self.handle_session_description(msg.d),
            OP_HEARTBEAT | OP_HEARTBEAT_ACK => self.handle_heartbeat_ack(),
            OP_SPEAKING => self.handle_speaking(msg.d).await,
            OP_INVALID_SESSION => self.handle_invalid_session().await,
            OP_HELLO => {
                trace!(guild_id = self.ctx.server.guild_id, "ignoring voice hello");
                None
            }
            op => {
                warn!(
                    guild_id = self.ctx.server.guild_id,
                    "unknown voice op {op}: {:?}", msg.d
                );
                None
            }
        }
    }

    /// Op 2: record SSRC and media port, start heartbeats, discover our
    /// public address and answer with protocol selection.
    async fn handle_ready(&mut self, d: Value) -> Option<SessionOutcome> {
        let ssrc = d["ssrc"].as_u64().unwrap_or(0) as u32;
        let port = d["port"].as_u64().unwrap_or(0) as u16;
        let interval_ms = match d["heartbeat_interval"].as_u64() {
            Some(ms) if ms > 0 => ms,
            _ => DEFAULT_HEARTBEAT_INTERVAL_MS,
        };

        self.ctx.ssrc.store(ssrc, Ordering::Release);
        debug!(
            guild_id = self.ctx.server.guild_id,
            ssrc, port, interval_ms, stage = ?self.stage, "voice ready"
        );

        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        self.heartbeat = Some(spawn_heartbeat(
            self.tx.clone(),
            self.ctx.clone(),
            interval_ms,
        ));

        self.stage = ConnectionStage::IpDiscovery;
        let udp = match UdpLink::setup(&self.ctx.endpoint_host, port).await {
            Ok(udp) => Arc::new(udp),
            Err(e) => {
                error!(guild_id = self.ctx.server.guild_id, "media socket setup failed: {e}");
                return Some(SessionOutcome::Reconnect);
            }
        };
        *self.ctx.udp.write() = Some(udp.clone());
        self.udp = Some(udp.clone());

        match discovery::discover(&udp, ssrc).await {
            Ok((address, our_port)) => {
                debug!(
                    guild_id = self.ctx.server.guild_id,
                    %address, our_port, "discovered public media address"
                );
                self.send_json(
                    OP_SELECT_PROTOCOL,
                    select_protocol_payload(&address, our_port),
                );
                self.stage = ConnectionStage::AwaitingSessionDescription;
                None
            }
            Err(e) => {
                error!(guild_id = self.ctx.server.guild_id, "IP discovery failed: {e}");
                Some(SessionOutcome::Reconnect)
            }
        }
    }

    /// Op 4: store the session key, signal readiness, start the receiver.
    fn handle_session_description(&mut self, d: Value) -> Option<SessionOutcome> {
        let Some(key) = parse_secret_key(&d) else {
            error!(
                guild_id = self.ctx.server.guild_id,
                "missing or invalid secret_key in session description"
            );
            return Some(SessionOutcome::Reconnect);
        };

        let secret = Arc::new(SecretBox::new(key));
        *self.ctx.secret.write() = Some(secret.clone());
        self.ctx.resume.store(true, Ordering::Release);
        self.ctx.reconnect_attempts.store(0, Ordering::Release);
        self.stage = ConnectionStage::Ready;

        if self.ctx.config.enable_incoming {
            if let Some(udp) = self.udp.clone() {
                if let Some(handle) = self.receiver.take() {
                    handle.abort();
                }
                self.receiver = Some(spawn_receiver(self.ctx.clone(), udp, secret));
            }
        }

        info!(guild_id = self.ctx.server.guild_id, "voice session ready");
        let _ = self.ctx.ready.send(true);
        None
    }

    /// Op 3 / op 6: publish the round-trip time.
    fn handle_heartbeat_ack(&self) -> Option<SessionOutcome> {
        let sent_ms = self.ctx.last_heartbeat.load(Ordering::Relaxed);
        let now = now_ms();
        if sent_ms > 0 {
            self.ctx
                .ping_ms
                .store(now.saturating_sub(sent_ms) as i64, Ordering::Relaxed);
        }
        self.ctx.last_heartbeat.store(now, Ordering::Relaxed);
        None
    }

    /// Op 5: learn the SSRC↔user binding and surface the update.
    async fn handle_speaking(&mut self, d: Value) -> Option<SessionOutcome> {
        let speaking = d["speaking"]
            .as_bool()
            .unwrap_or_else(|| d["speaking"].as_u64().unwrap_or(0) != 0);
        let ssrc = d["ssrc"].as_u64().map(|v| v as u32);
        let user_id = d["user_id"]
            .as_u64()
            .or_else(|| d["user_id"].as_str().and_then(|s| s.parse().ok()));

        let (Some(ssrc), Some(user_id)) = (ssrc, user_id) else {
            trace!(
                guild_id = self.ctx.server.guild_id,
                "speaking update without ssrc/user_id: {d:?}"
            );
            return None;
        };

        self.ctx.ssrc_users.insert(ssrc, user_id);
        let user = resolve_user(
            self.ctx.cache.as_deref(),
            self.ctx.server.guild_id,
            user_id,
        )
        .await;
        self.ctx.events.emit(VoiceEvent::UserSpeaking {
            ssrc,
            user,
            speaking,
        });
        None
    }

    /// Op 9: the session is gone; identify fresh on this socket.
    async fn handle_invalid_session(&mut self) -> Option<SessionOutcome> {
        info!(
            guild_id = self.ctx.server.guild_id,
            "voice session invalidated; identifying fresh"
        );
        self.ctx.resume.store(false, Ordering::Release);
        tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_FRESH_MS)).await;
        self.identify(false);
        None
    }

    fn send_json(&self, op: u8, d: Value) {
        if let Ok(json) = serde_json::to_string(&GatewayMessage { op, d }) {
            let _ = self.tx.send(json);
        }
    }
}

impl<'a> Drop for SessionState<'a> {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Some(handle) = self.receiver.take() {
            handle.abort();
        }
    }
}
