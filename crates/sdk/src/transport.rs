//! The transport boundary: opaque byte frames in, commands out.
//!
//! A transport runs its I/O wherever it likes (the WebSocket implementation
//! uses a tokio task); inbound frames and lifecycle signals cross to the
//! client tick thread as [`TransportEvent`]s over an unbounded channel that
//! the room drains. Sending on a transport that is not open is a silent
//! no-op.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("transport is closed")]
    Closed,
}

/// Lifecycle and data events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(Vec<u8>),
    Close { code: u16, reason: String },
    Error(String),
}

/// What the room layer needs from a connection.
pub trait Transport {
    /// Queues a frame for delivery. No-op when the connection is not open.
    fn send(&self, bytes: Vec<u8>);

    /// Optional unreliable delivery; the default is a silent no-op for
    /// transports without an unreliable channel.
    fn send_unreliable(&self, bytes: Vec<u8>) {
        let _ = bytes;
    }

    fn close(&self, code: u16, reason: &str);

    fn is_open(&self) -> bool;
}
