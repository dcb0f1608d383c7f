//! Connection lifecycle: construction, the reconnect-capable driver loop,
//! readiness and playback signals, the public operations, and disposal.

pub mod constants;
pub mod discovery;
pub mod handler;
pub mod heartbeat;
pub mod receiver;
pub mod sender;
pub mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::OpusEncoder;
use crate::common::errors::{VoiceError, VoiceResult};
use crate::common::types::{ChannelId, Ssrc, UserId};
use crate::config::ConnectionConfig;
use crate::crypto::SecretBox;
use crate::events::{EventBus, UserCache, VoiceEvent};
use crate::transport::{UdpLink, WsFrame, WsLink};

use self::constants::{
    BACKOFF_BASE_MS, MAX_RECONNECT_ATTEMPTS, VOICE_GATEWAY_VERSION, WRITE_TASK_SHUTDOWN_MS,
};
use self::handler::SessionState;
use self::sender::SendState;
use self::types::{
    GatewayMessage, SessionOutcome, VoiceServerInfo, VoiceStateInfo, parse_endpoint,
};

/// State shared between the driver loop, its spawned tasks and the
/// caller-facing operations.
pub(crate) struct ConnectionContext {
    pub server: VoiceServerInfo,
    pub state: VoiceStateInfo,
    /// Parsed `server.endpoint`.
    pub endpoint_host: String,
    pub config: ConnectionConfig,
    pub cache: Option<Arc<dyn UserCache>>,

    /// Assigned by the ready message; every outbound frame carries it.
    pub ssrc: AtomicU32,
    /// Session key; written once per session by the dispatch task.
    pub secret: RwLock<Option<Arc<SecretBox>>>,
    /// Media socket of the current session.
    pub udp: RwLock<Option<Arc<UdpLink>>>,
    /// Writer handle of the current signalling socket.
    pub ws_tx: RwLock<Option<UnboundedSender<String>>>,

    /// The single-permit send token; owns the cursor, encoder and pacing anchor.
    pub send: Mutex<SendState>,
    pub ready: watch::Sender<bool>,
    pub playing: watch::Sender<bool>,
    pub ping_ms: AtomicI64,
    pub last_heartbeat: AtomicU64,
    pub resume: AtomicBool,
    pub disposed: AtomicBool,
    pub reconnect_attempts: AtomicU32,
    pub cancel: CancellationToken,
    pub ssrc_users: DashMap<Ssrc, UserId>,
    pub events: EventBus,
}

impl ConnectionContext {
    /// Queues one signalling frame on the current socket; frames sent
    /// between sessions are dropped.
    pub(crate) fn send_gateway(&self, op: u8, d: Value) {
        if let Some(tx) = self.ws_tx.read().as_ref() {
            if let Ok(json) = serde_json::to_string(&GatewayMessage { op, d }) {
                let _ = tx.send(json);
            }
        }
    }
}

/// One active voice channel: a signalling session over WebSocket plus a
/// media session over UDP.
pub struct VoiceConnection {
    ctx: Arc<ConnectionContext>,
    started: AtomicBool,
}

impl VoiceConnection {
    pub fn new(
        server: VoiceServerInfo,
        state: VoiceStateInfo,
        config: ConnectionConfig,
        cache: Option<Arc<dyn UserCache>>,
    ) -> VoiceResult<Self> {
        let (endpoint_host, _) = parse_endpoint(&server.endpoint);
        let encoder = OpusEncoder::new(config.profile)?;
        let (ready, _) = watch::channel(false);
        let (playing, _) = watch::channel(false);

        Ok(Self {
            ctx: Arc::new(ConnectionContext {
                server,
                state,
                endpoint_host,
                config,
                cache,
                ssrc: AtomicU32::new(0),
                secret: RwLock::new(None),
                udp: RwLock::new(None),
                ws_tx: RwLock::new(None),
                send: Mutex::new(SendState::new(encoder)),
                ready,
                playing,
                ping_ms: AtomicI64::new(0),
                last_heartbeat: AtomicU64::new(0),
                resume: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                cancel: CancellationToken::new(),
                ssrc_users: DashMap::new(),
                events: EventBus::default(),
            }),
            started: AtomicBool::new(false),
        })
    }

    /// Opens the signalling socket and resolves once the session reaches
    /// ready (the session key has been processed).
    pub async fn connect(&self) -> VoiceResult<()> {
        if self.ctx.disposed.load(Ordering::Acquire) {
            return Err(VoiceError::TransportClosed);
        }
        if !self.started.swap(true, Ordering::AcqRel) {
            tokio::spawn(run_driver(self.ctx.clone()));
        }

        let mut ready = self.ctx.ready.subscribe();
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(VoiceError::TransportClosed),
            changed = ready.wait_for(|ready| *ready) => {
                changed.map(|_| ()).map_err(|_| VoiceError::TransportClosed)
            }
        }
    }

    /// Encodes, encrypts and transmits one PCM frame at real-time pace.
    pub async fn send(&self, pcm: &[u8], block_ms: u32, bitrate_kbps: u32) -> VoiceResult<()> {
        sender::send_frame(&self.ctx, pcm, block_ms, bitrate_kbps).await
    }

    /// Announces the speaking state; `false` also ends the pacing epoch.
    pub async fn send_speaking(&self, speaking: bool) -> VoiceResult<()> {
        sender::send_speaking(&self.ctx, speaking).await
    }

    /// Resolves once no playback is in flight; immediately if none is.
    pub async fn wait_for_playback_finish(&self) {
        let mut playing = self.ctx.playing.subscribe();
        let _ = playing.wait_for(|playing| !*playing).await;
    }

    /// Cancels all tasks and closes both transports. Re-entrant disposal
    /// is a no-op.
    pub fn disconnect(&self) {
        if self.ctx.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(guild_id = self.ctx.server.guild_id, "voice connection disposed");
        self.ctx.cancel.cancel();
        *self.ctx.ws_tx.write() = None;
        *self.ctx.udp.write() = None;
        *self.ctx.secret.write() = None;
        let _ = self.ctx.ready.send(false);
        let _ = self.ctx.playing.send(false);
    }

    pub fn is_playing(&self) -> bool {
        *self.ctx.playing.borrow()
    }

    /// Most recent heartbeat round-trip time in milliseconds.
    pub fn ping(&self) -> i64 {
        self.ctx.ping_ms.load(Ordering::Relaxed)
    }

    pub fn channel(&self) -> ChannelId {
        self.ctx.state.channel_id
    }

    /// Our own SSRC, 0 until the ready message assigns one.
    pub fn ssrc(&self) -> Ssrc {
        self.ctx.ssrc.load(Ordering::Acquire)
    }

    /// Registers a subscriber for connection events.
    pub fn subscribe(&self) -> UnboundedReceiver<VoiceEvent> {
        self.ctx.events.subscribe()
    }
}

impl Drop for VoiceConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Outer loop: runs signalling sessions until disposal, reconnecting with
/// capped exponential backoff. A processed session description resets the
/// attempt counter (see `SessionState::handle_session_description`).
async fn run_driver(ctx: Arc<ConnectionContext>) {
    loop {
        if ctx.disposed.load(Ordering::Acquire) || ctx.cancel.is_cancelled() {
            break;
        }

        let resume = ctx.resume.load(Ordering::Acquire);
        match run_session(&ctx, resume).await {
            Ok(SessionOutcome::Shutdown) => {
                debug!(guild_id = ctx.server.guild_id, "voice session shut down cleanly");
                break;
            }
            Ok(SessionOutcome::Reconnect) => {
                let attempt = ctx.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    warn!(
                        guild_id = ctx.server.guild_id,
                        "max reconnect attempts ({MAX_RECONNECT_ATTEMPTS}) reached"
                    );
                    break;
                }
                let backoff = backoff_delay(attempt);
                debug!(
                    guild_id = ctx.server.guild_id,
                    attempt, "voice session lost; reconnecting in {backoff:?}"
                );
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(e) => {
                ctx.events.emit(VoiceEvent::SocketError {
                    message: e.to_string(),
                });
                let attempt = ctx.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    error!(
                        guild_id = ctx.server.guild_id,
                        "voice connection failed after {MAX_RECONNECT_ATTEMPTS} attempts: {e}"
                    );
                    break;
                }
                let backoff = backoff_delay(attempt);
                warn!(
                    guild_id = ctx.server.guild_id,
                    attempt, "voice connection error: {e}; retrying in {backoff:?}"
                );
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    // The connection is unusable once the driver stops; unblock waiters.
    if !ctx.disposed.load(Ordering::Acquire) {
        ctx.cancel.cancel();
    }
    let _ = ctx.ready.send(false);
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1).min(3)))
}

/// One signalling session: socket open through close, returning what the
/// driver should do next.
async fn run_session(ctx: &Arc<ConnectionContext>, resume: bool) -> VoiceResult<SessionOutcome> {
    let url = format!(
        "wss://{}/?encoding=json&v={}",
        ctx.endpoint_host, VOICE_GATEWAY_VERSION
    );
    debug!(guild_id = ctx.server.guild_id, %url, "connecting voice gateway");

    let (mut writer, mut reader) = WsLink::connect(&url).await?.split();

    // All outbound frames funnel through one writer task.
    let (tx, mut rx) = unbounded_channel::<String>();
    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = writer.send_text(text).await {
                warn!("voice WebSocket write error: {e}");
                break;
            }
        }
        let _ = writer.close(1000).await;
    });

    *ctx.ws_tx.write() = Some(tx.clone());

    let mut state = SessionState::new(ctx, tx.clone());
    state.identify(resume);

    let outcome = loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break SessionOutcome::Shutdown,
            frame = reader.next() => match frame {
                Some(WsFrame::Text(text)) => {
                    if let Some(outcome) = state.handle_text(&text).await {
                        break outcome;
                    }
                }
                Some(WsFrame::Closed { code, reason }) => {
                    info!(
                        guild_id = ctx.server.guild_id,
                        code, %reason, "voice WebSocket closed"
                    );
                    break SessionOutcome::Reconnect;
                }
                Some(WsFrame::Error(message)) => {
                    warn!(guild_id = ctx.server.guild_id, "voice WebSocket error: {message}");
                    ctx.events.emit(VoiceEvent::SocketError { message });
                    break SessionOutcome::Reconnect;
                }
                None => {
                    debug!(guild_id = ctx.server.guild_id, "voice WebSocket stream ended");
                    break SessionOutcome::Reconnect;
                }
            }
        }
    };

    *ctx.ws_tx.write() = None;
    let _ = ctx.ready.send(false);
    drop(state);
    drop(tx);
    let _ = tokio::time::timeout(
        Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
        write_task,
    )
    .await;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioProfile;

    fn connection() -> VoiceConnection {
        VoiceConnection::new(
            VoiceServerInfo {
                endpoint: "voice.example:443".into(),
                guild_id: 1,
                token: "tk".into(),
            },
            VoiceStateInfo {
                user_id: 2,
                session_id: "sn".into(),
                channel_id: 9,
            },
            ConnectionConfig {
                profile: AudioProfile::Audio,
                enable_incoming: false,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn fresh_connection_observables() {
        let conn = connection();
        assert!(!conn.is_playing());
        assert_eq!(conn.ping(), 0);
        assert_eq!(conn.channel(), 9);
        assert_eq!(conn.ssrc(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let conn = connection();
        conn.disconnect();
        conn.disconnect();
        assert!(conn.ctx.disposed.load(Ordering::Acquire));
        assert!(conn.ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn connect_after_disconnect_fails() {
        let conn = connection();
        conn.disconnect();
        assert!(matches!(
            conn.connect().await,
            Err(VoiceError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn send_before_ready_is_not_initialized() {
        let conn = connection();
        let pcm = vec![0u8; 3840];
        assert!(matches!(
            conn.send(&pcm, 20, 16).await,
            Err(VoiceError::NotInitialized)
        ));
        assert!(matches!(
            conn.send_speaking(true).await,
            Err(VoiceError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn playback_wait_returns_when_idle() {
        let conn = connection();
        conn.wait_for_playback_finish().await;
    }

    #[tokio::test]
    async fn session_description_stores_key_and_signals_ready() {
        let conn = connection();
        let (tx, _rx) = unbounded_channel();
        let mut state = SessionState::new(&conn.ctx, tx);

        let bytes: Vec<u8> = (0..32).collect();
        let text = serde_json::to_string(&GatewayMessage {
            op: constants::OP_SESSION_DESCRIPTION,
            d: serde_json::json!({ "secret_key": bytes }),
        })
        .unwrap();

        assert!(state.handle_text(&text).await.is_none());
        assert!(*conn.ctx.ready.borrow());
        assert!(conn.ctx.secret.read().is_some());
        assert!(conn.ctx.resume.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn heartbeat_ack_publishes_rtt() {
        let conn = connection();
        let (tx, _rx) = unbounded_channel();
        let mut state = SessionState::new(&conn.ctx, tx);

        conn.ctx
            .last_heartbeat
            .store(crate::common::utils::now_ms() - 87, Ordering::Relaxed);
        assert!(state.handle_text(r#"{"op":6,"d":null}"#).await.is_none());

        let ping = conn.ping();
        assert!((87..=95).contains(&ping), "ping was {ping}");
    }

    #[tokio::test]
    async fn speaking_update_grows_ssrc_map_and_emits() {
        let conn = connection();
        let mut events = conn.subscribe();
        let (tx, _rx) = unbounded_channel();
        let mut state = SessionState::new(&conn.ctx, tx);

        let text = r#"{"op":5,"d":{"speaking":true,"delay":0,"ssrc":42,"user_id":7}}"#;
        assert!(state.handle_text(text).await.is_none());
        assert_eq!(*conn.ctx.ssrc_users.get(&42).unwrap().value(), 7);

        match events.recv().await {
            Some(VoiceEvent::UserSpeaking { ssrc, user, speaking }) => {
                assert_eq!(ssrc, 42);
                assert_eq!(user.id, 7);
                assert!(speaking);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // A reannounced SSRC overwrites the binding.
        let text = r#"{"op":5,"d":{"speaking":false,"delay":0,"ssrc":42,"user_id":8}}"#;
        assert!(state.handle_text(text).await.is_none());
        assert_eq!(*conn.ctx.ssrc_users.get(&42).unwrap().value(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_session_clears_resume_and_reidentifies() {
        let conn = connection();
        conn.ctx.resume.store(true, Ordering::Release);

        let (tx, mut rx) = unbounded_channel();
        let mut state = SessionState::new(&conn.ctx, tx);

        assert!(state.handle_text(r#"{"op":9,"d":null}"#).await.is_none());
        assert!(!conn.ctx.resume.load(Ordering::Acquire));

        let frame: GatewayMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame.op, constants::OP_IDENTIFY);
        assert_eq!(frame.d["server_id"], 1);
        assert_eq!(frame.d["user_id"], 2);
        assert_eq!(frame.d["session_id"], "sn");
        assert_eq!(frame.d["token"], "tk");
    }

    #[tokio::test]
    async fn unknown_and_hello_ops_are_dropped() {
        let conn = connection();
        let (tx, _rx) = unbounded_channel();
        let mut state = SessionState::new(&conn.ctx, tx);

        assert!(state.handle_text(r#"{"op":8,"d":{}}"#).await.is_none());
        assert!(state.handle_text(r#"{"op":99,"d":{}}"#).await.is_none());
        assert!(state.handle_text("not json").await.is_none());
    }
}
