//! Narrow shim over the signalling WebSocket.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::common::errors::VoiceError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected signalling socket, split on demand into writer and reader.
pub struct WsLink {
    stream: WsStream,
}

/// One inbound frame, reduced to what the state machine consumes.
#[derive(Debug)]
pub enum WsFrame {
    Text(String),
    Closed { code: u16, reason: String },
    Error(String),
}

pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl WsLink {
    pub async fn connect(url: &str) -> Result<Self, VoiceError> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { stream })
    }

    pub fn split(self) -> (WsWriter, WsReader) {
        let (sink, stream) = self.stream.split();
        (WsWriter { sink }, WsReader { stream })
    }
}

impl WsWriter {
    pub async fn send_text(&mut self, text: String) -> Result<(), VoiceError> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self, code: u16) -> Result<(), VoiceError> {
        self.sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            })))
            .await?;
        Ok(())
    }
}

impl WsReader {
    /// Next frame relevant to the state machine; `None` when the stream ends.
    /// Ping/pong and binary frames are absorbed here.
    pub async fn next(&mut self) -> Option<WsFrame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(WsFrame::Text(text.to_string())),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(cf) => (cf.code.into(), cf.reason.to_string()),
                        None => (1000u16, String::new()),
                    };
                    return Some(WsFrame::Closed { code, reason });
                }
                Ok(_) => continue,
                Err(e) => return Some(WsFrame::Error(e.to_string())),
            }
        }
    }
}
