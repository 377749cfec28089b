//! RPC error types.

use skein_core::CodecError;
use skein_transport::TransportError;
use thiserror::Error;

use crate::StatusCode;

/// Errors surfaced to RPC callers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The underlying connection or stream failed.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// A header could not be encoded or decoded.
    #[error("header codec error: {0}")]
    Codec(#[from] CodecError),

    /// The header framing is broken.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A header is larger than the configured limit.
    #[error("header of {size} bytes exceeds the {max} byte limit")]
    HeaderTooLarge {
        /// Size of the offending header.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Fields and payload are frozen once a request was sent.
    #[error("request was already sent")]
    RequestAlreadySent,

    /// The request was disposed.
    #[error("request was disposed")]
    RequestDisposed,

    /// The request deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The invocation's cancellation token fired.
    #[error("invocation cancelled")]
    Cancelled,

    /// A payload producer failed.
    #[error("payload error: {0}")]
    Payload(String),

    /// A service address could not be parsed.
    #[error("invalid service address '{0}'")]
    InvalidAddress(String),

    /// Binding or connecting failed.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered with a failure status.
    #[error("remote returned {status}: {message}")]
    Remote {
        /// Status of the response.
        status: StatusCode,
        /// Error message of the response.
        message: String,
    },
}

impl From<TransportError> for RpcError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => RpcError::Cancelled,
            other => RpcError::Transport(other),
        }
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// An unhandled fault raised by a middleware or a dispatcher.
///
/// Faults never cross the connection: the pipeline boundary logs them and
/// answers with a generic [`StatusCode::InternalError`] response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DispatchError {
    message: String,
}

impl DispatchError {
    /// A fault described by `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The fault description. Only ever logged locally.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RpcError> for DispatchError {
    fn from(error: RpcError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<TransportError> for DispatchError {
    fn from(error: TransportError) -> Self {
        Self::new(error.to_string())
    }
}
