pub mod udp;
pub mod ws;

pub use udp::UdpLink;
pub use ws::{WsFrame, WsLink, WsReader, WsWriter};
