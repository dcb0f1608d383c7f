//! voxlink: a per-connection voice engine.
//!
//! One [`VoiceConnection`] holds a signalling session over a secure
//! WebSocket and a media session over UDP. The signalling state machine
//! negotiates session parameters (identify/resume, heartbeat, IP
//! discovery, session key); the send path paces, encodes, encrypts and
//! transmits 20 ms PCM frames; the receive path decrypts and decodes
//! inbound RTP and correlates streams to users.
//!
//! ```no_run
//! use voxlink::{ConnectionConfig, VoiceConnection, VoiceServerInfo, VoiceStateInfo};
//!
//! # async fn run() -> Result<(), voxlink::VoiceError> {
//! let connection = VoiceConnection::new(
//!     VoiceServerInfo {
//!         endpoint: "voice.example:443".into(),
//!         guild_id: 1,
//!         token: "tk".into(),
//!     },
//!     VoiceStateInfo {
//!         user_id: 2,
//!         session_id: "sn".into(),
//!         channel_id: 3,
//!     },
//!     ConnectionConfig::default(),
//!     None,
//! )?;
//!
//! connection.connect().await?;
//! let frame = vec![0u8; 3840]; // 20 ms of 48 kHz stereo s16le
//! connection.send(&frame, 20, 16).await?;
//! connection.send_speaking(false).await?;
//! connection.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod common;
pub mod config;
pub mod crypto;
pub mod events;
pub mod gateway;
pub mod rtp;
pub mod transport;

pub use codec::DEFAULT_BITRATE_KBPS;
pub use common::errors::{VoiceError, VoiceResult};
pub use config::{AudioProfile, ConnectionConfig};
pub use events::{UserCache, VoiceEvent, VoiceUser};
pub use gateway::VoiceConnection;
pub use gateway::types::{VoiceServerInfo, VoiceStateInfo};
