//! Error types for the channel and session.
//!
//! Validation failures are not errors: they are reported as
//! [`Validation`](crate::message::Validation) values and never abort a session.

use thiserror::Error;

/// Fatal channel failures. Any of these ends the session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer refused or garbled the path handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Malformed frame on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel closed before the exchange finished.
    #[error("channel closed")]
    ChannelClosed,

    /// A configured deadline expired.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Result type alias using TransportError.
pub type Result<T> = std::result::Result<T, TransportError>;
