//! Narrow shim over the connected media socket.
//!
//! One socket per session, shared by the send pacer and the receiver;
//! connected datagram sockets support concurrent send and receive.

use tokio::net::UdpSocket;

use crate::common::errors::VoiceError;

pub struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    /// Resolves the media peer, binds an ephemeral local port and connects.
    pub async fn setup(hostname: &str, port: u16) -> Result<Self, VoiceError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((hostname, port)).await?;
        Ok(Self { socket })
    }

    pub async fn send(&self, buf: &[u8]) -> Result<(), VoiceError> {
        self.socket.send(buf).await?;
        Ok(())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, VoiceError> {
        Ok(self.socket.recv(buf).await?)
    }
}
