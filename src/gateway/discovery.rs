//! IP discovery: learns the public address and port of the media socket
//! so the signalling peer can route inbound audio.

use std::time::Duration;

use crate::common::errors::{VoiceError, VoiceResult};
use crate::common::types::Ssrc;
use crate::gateway::constants::DISCOVERY_TIMEOUT_MS;
use crate::transport::UdpLink;

/// Size of the discovery probe datagram.
pub const PROBE_LEN: usize = 70;

/// The probe: zeros with the little-endian SSRC in the last four bytes.
pub fn build_probe(ssrc: Ssrc) -> [u8; PROBE_LEN] {
    let mut probe = [0u8; PROBE_LEN];
    probe[66..70].copy_from_slice(&ssrc.to_le_bytes());
    probe
}

/// Reply layout: nul-terminated ASCII address from byte 4, big-endian
/// port in the final two bytes.
pub fn parse_reply(reply: &[u8]) -> VoiceResult<(String, u16)> {
    if reply.len() < 8 {
        return Err(VoiceError::MalformedPacket("discovery reply too short"));
    }

    let address_field = &reply[4..reply.len() - 2];
    let end = address_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(address_field.len());
    let address = std::str::from_utf8(&address_field[..end])
        .map_err(|_| VoiceError::MalformedPacket("discovery address not ASCII"))?
        .to_string();

    let port = u16::from_be_bytes([reply[reply.len() - 2], reply[reply.len() - 1]]);
    Ok((address, port))
}

/// Runs one probe/reply exchange on the connected media socket.
pub async fn discover(udp: &UdpLink, ssrc: Ssrc) -> VoiceResult<(String, u16)> {
    udp.send(&build_probe(ssrc)).await?;

    let mut buf = [0u8; 128];
    let timeout = Duration::from_millis(DISCOVERY_TIMEOUT_MS);
    match tokio::time::timeout(timeout, udp.recv(&mut buf)).await {
        Ok(Ok(n)) => parse_reply(&buf[..n]),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(VoiceError::TransportError("IP discovery timed out".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_zeros_plus_le_ssrc() {
        let probe = build_probe(42);
        assert_eq!(probe.len(), 70);
        assert_eq!(&probe[66..70], &[42, 0, 0, 0]);
        assert!(probe[..66].iter().all(|&b| b == 0));
    }

    #[test]
    fn reply_parses_address_and_port() {
        let mut reply = [0u8; 70];
        reply[4..15].copy_from_slice(b"203.0.113.5");
        reply[68..70].copy_from_slice(&50004u16.to_be_bytes());

        let (address, port) = parse_reply(&reply).unwrap();
        assert_eq!(address, "203.0.113.5");
        assert_eq!(port, 50004);
    }

    #[test]
    fn short_reply_is_malformed() {
        assert!(matches!(
            parse_reply(&[0u8; 4]),
            Err(VoiceError::MalformedPacket(_))
        ));
    }
}
