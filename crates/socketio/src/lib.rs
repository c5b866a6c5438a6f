//! Minimal Socket.IO client over the Engine.IO WebSocket transport.
//!
//! Only what a receive-mostly client needs is implemented: the Engine.IO v4
//! handshake and heartbeat, Socket.IO v5 namespace connect/disconnect and
//! text events. Long-polling and binary attachments are not supported.
//!
//! - `packet`: encoding and decoding of Engine.IO and Socket.IO packets.
//! - `connection`: one WebSocket connection, from handshake to disconnect.
//! - `manager`: the reconnecting [`ConnectionManager`].

mod connection;
pub mod manager;
pub mod packet;

pub use manager::{
    ChannelConfig, ChannelEvent, ChannelStatus, ConnectionManager, ConnectionState,
};

/// Errors raised while establishing or running a channel connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] packet::PacketError),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Handshake timed out")]
    Timeout,
}
