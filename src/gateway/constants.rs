/// Voice gateway version to use in the WebSocket URL.
pub const VOICE_GATEWAY_VERSION: u8 = 3;

/// Encryption mode announced during protocol selection.
pub const ENCRYPTION_MODE: &str = "xsalsa20_poly1305";

/// Signalling port assumed when the endpoint string omits one.
pub const DEFAULT_ENDPOINT_PORT: u16 = 80;

/// RTP clock ticks per millisecond of audio (48 kHz clock).
pub const TICKS_PER_MS: u32 = 48;

/// Pacing step of the send path: one 20 ms frame.
pub const FRAME_STEP_MS: u64 = 20;

/// Frame length reported with decoded inbound audio.
pub const RECEIVE_FRAME_MS: u32 = 20;

/// Fallback heartbeat cadence when the ready payload omits one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Maximum reconnect attempts before giving up on a voice session.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay (ms) for the exponential backoff on reconnect.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Fixed delay (ms) before a fresh Identify after a session-invalid notice.
pub const RECONNECT_DELAY_FRESH_MS: u64 = 500;

/// Timeout (ms) allowed for the WS write task to shut down gracefully.
pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Reply wait (ms) for the IP discovery probe.
pub const DISCOVERY_TIMEOUT_MS: u64 = 2_000;

/// Largest inbound media datagram the receiver accepts.
pub const VOICE_PACKET_MAX: usize = 1460;

pub const OP_IDENTIFY: u8 = 0;
pub const OP_SELECT_PROTOCOL: u8 = 1;
pub const OP_READY: u8 = 2;
pub const OP_HEARTBEAT: u8 = 3;
pub const OP_SESSION_DESCRIPTION: u8 = 4;
pub const OP_SPEAKING: u8 = 5;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_RESUME: u8 = 7;
pub const OP_HELLO: u8 = 8;
pub const OP_INVALID_SESSION: u8 = 9;
