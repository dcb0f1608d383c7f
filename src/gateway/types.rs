use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::common::types::{ChannelId, GuildId, SessionId, Ssrc, UserId};
use crate::gateway::constants::{DEFAULT_ENDPOINT_PORT, ENCRYPTION_MODE};

/// One signalling frame: integer opcode plus opaque payload.
#[derive(Serialize, Deserialize, Debug)]
pub struct GatewayMessage {
    pub op: u8,
    pub d: Value,
}

/// Voice-server payload supplied by the higher-level client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceServerInfo {
    /// `host[:port]`; the port defaults to 80 when omitted.
    pub endpoint: String,
    pub guild_id: GuildId,
    pub token: String,
}

/// Voice-state payload supplied by the higher-level client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateInfo {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub channel_id: ChannelId,
}

/// Outcome of a single WS session — tells the outer loop what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The socket went away without a disposal; reconnect with the
    /// current resume flag.
    Reconnect,
    /// The connection was disposed or cancelled; stop entirely.
    Shutdown,
}

/// Handshake progress of one signalling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStage {
    Disconnected,
    Connecting,
    Identifying,
    Resuming,
    AwaitingReady,
    IpDiscovery,
    AwaitingSessionDescription,
    Ready,
    Closed,
}

/// Splits `host[:port]` into hostname and port.
pub fn parse_endpoint(endpoint: &str) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (endpoint.to_string(), DEFAULT_ENDPOINT_PORT),
        },
        None => (endpoint.to_string(), DEFAULT_ENDPOINT_PORT),
    }
}

pub fn identify_payload(server: &VoiceServerInfo, state: &VoiceStateInfo) -> Value {
    json!({
        "server_id": server.guild_id,
        "user_id": state.user_id,
        "session_id": state.session_id,
        "token": server.token,
    })
}

pub fn resume_payload(server: &VoiceServerInfo, state: &VoiceStateInfo) -> Value {
    json!({
        "server_id": server.guild_id,
        "session_id": state.session_id,
        "token": server.token,
    })
}

pub fn select_protocol_payload(address: &str, port: u16) -> Value {
    json!({
        "protocol": "udp",
        "data": {
            "address": address,
            "port": port,
            "mode": ENCRYPTION_MODE,
        }
    })
}

pub fn speaking_payload(speaking: bool, ssrc: Ssrc) -> Value {
    json!({
        "speaking": speaking,
        "delay": 0,
        "ssrc": ssrc,
    })
}

pub fn heartbeat_payload(epoch_secs: u32) -> Value {
    json!(epoch_secs)
}

/// Extracts the 32-byte session key from a session-description payload.
pub fn parse_secret_key(d: &Value) -> Option<[u8; 32]> {
    let array = d["secret_key"].as_array()?;
    if array.len() < 32 {
        return None;
    }
    let mut key = [0u8; 32];
    for (slot, value) in key.iter_mut().zip(array) {
        *slot = value.as_u64()? as u8;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (VoiceServerInfo, VoiceStateInfo) {
        (
            VoiceServerInfo {
                endpoint: "voice.example:443".into(),
                guild_id: 1,
                token: "tk".into(),
            },
            VoiceStateInfo {
                user_id: 2,
                session_id: "sn".into(),
                channel_id: 3,
            },
        )
    }

    #[test]
    fn endpoint_with_port() {
        assert_eq!(parse_endpoint("voice.example:443"), ("voice.example".into(), 443));
    }

    #[test]
    fn endpoint_without_port_defaults_to_80() {
        assert_eq!(parse_endpoint("voice.example"), ("voice.example".into(), 80));
    }

    #[test]
    fn identify_matches_wire_shape() {
        let (server, state) = fixtures();
        let d = identify_payload(&server, &state);
        assert_eq!(
            d,
            json!({"server_id": 1, "user_id": 2, "session_id": "sn", "token": "tk"})
        );
    }

    #[test]
    fn resume_omits_user_id() {
        let (server, state) = fixtures();
        let d = resume_payload(&server, &state);
        assert_eq!(d, json!({"server_id": 1, "session_id": "sn", "token": "tk"}));
    }

    #[test]
    fn select_protocol_carries_fixed_mode() {
        let d = select_protocol_payload("203.0.113.5", 50004);
        assert_eq!(d["protocol"], "udp");
        assert_eq!(d["data"]["address"], "203.0.113.5");
        assert_eq!(d["data"]["port"], 50004);
        assert_eq!(d["data"]["mode"], "xsalsa20_poly1305");
    }

    #[test]
    fn secret_key_roundtrip() {
        let bytes: Vec<u8> = (0..32).collect();
        let d = json!({ "secret_key": bytes });
        let key = parse_secret_key(&d).unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[1], 0x01);
        assert_eq!(key[31], 0x1F);
    }

    #[test]
    fn short_secret_key_is_rejected() {
        let d = json!({ "secret_key": [1, 2, 3] });
        assert!(parse_secret_key(&d).is_none());
    }
}
