//! Transport error types.

use thiserror::Error;

/// Errors surfaced by connections and streams.
///
/// `Clone` because one connection failure fans out to every pending stream
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection establishment failed for a reason other than trust.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The secure-channel handshake was rejected by one of the peers.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The stream was reset, locally or by the peer, with an application error code.
    #[error("stream aborted with error code {code}")]
    StreamAborted {
        /// Application error code carried by the reset.
        code: u64,
    },

    /// The connection was closed or disposed by this side.
    #[error("connection closed locally")]
    ConnectionClosedLocally,

    /// The peer closed the connection gracefully.
    #[error("connection closed by peer with error code {code}")]
    ConnectionClosedByPeer {
        /// Application error code carried by the peer's CLOSE frame.
        code: u64,
    },

    /// The underlying duplex connection failed or hung up without a CLOSE.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Nothing was received within the negotiated idle timeout.
    #[error("connection idle timeout")]
    ConnectionIdle,

    /// The peer broke the framing or flow-control rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The stream ended before the expected number of bytes arrived.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The write side of the stream is already closed.
    #[error("writes are closed")]
    WritesClosed,

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
