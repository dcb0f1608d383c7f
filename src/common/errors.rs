use thiserror::Error;

/// All failure kinds surfaced by the voice engine.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// An operation was attempted before the session reached ready.
    #[error("connection is not initialized")]
    NotInitialized,

    /// An inbound RTP packet could not be parsed.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// Secretbox tag verification failed on an inbound payload.
    #[error("secretbox authentication failed")]
    AuthenticationFailed,

    /// Opus or secretbox encode/decode failed.
    #[error("codec failure: {0}")]
    CodecFailure(String),

    /// The signalling WebSocket was closed.
    #[error("transport closed")]
    TransportClosed,

    /// Network I/O failed on one of the transports.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl From<std::io::Error> for VoiceError {
    fn from(e: std::io::Error) -> Self {
        Self::TransportError(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::TransportError(e.to_string())
    }
}

/// A convenient Result alias returning `VoiceError`.
pub type VoiceResult<T> = std::result::Result<T, VoiceError>;
