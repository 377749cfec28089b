//! Response status codes and the RPC error-code space on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use skein_transport::{ErrorCodeConverter, ResetReason};

/// Outcome carried in every response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// The dispatch succeeded.
    Ok,
    /// The service reported an application-level failure.
    ApplicationError,
    /// No dispatcher is mapped to the request path.
    NotFound,
    /// The dispatcher does not implement the operation.
    NotImplemented,
    /// The request header or payload could not be decoded.
    InvalidData,
    /// The caller is not allowed to invoke the operation.
    Unauthorized,
    /// The request deadline expired before a response was produced.
    DeadlineExceeded,
    /// The dispatch was cancelled.
    Canceled,
    /// The server is shutting down or cannot take the request.
    Unavailable,
    /// The dispatch failed with an unhandled fault.
    InternalError,
}

impl StatusCode {
    /// Whether this status reports a successful dispatch.
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Ok => "ok",
            StatusCode::ApplicationError => "application error",
            StatusCode::NotFound => "not found",
            StatusCode::NotImplemented => "not implemented",
            StatusCode::InvalidData => "invalid data",
            StatusCode::Unauthorized => "unauthorized",
            StatusCode::DeadlineExceeded => "deadline exceeded",
            StatusCode::Canceled => "canceled",
            StatusCode::Unavailable => "unavailable",
            StatusCode::InternalError => "internal error",
        };
        f.write_str(name)
    }
}

/// Application error codes carried by RESET and CLOSE on RPC connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum RpcErrorCode {
    /// Normal completion or a stream released without interest in its data.
    NoError = 0,
    /// The peer hit an unexpected failure.
    InternalError = 1,
    /// The operation was cancelled.
    Canceled = 2,
    /// The stream or connection was refused during shutdown.
    Unavailable = 3,
    /// A request or response header could not be decoded.
    InvalidData = 4,
}

impl RpcErrorCode {
    /// Numeric application code.
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Interpret an application code, mapping unknown values to `InternalError`.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => RpcErrorCode::NoError,
            2 => RpcErrorCode::Canceled,
            3 => RpcErrorCode::Unavailable,
            4 => RpcErrorCode::InvalidData,
            _ => RpcErrorCode::InternalError,
        }
    }
}

/// First wire code used by RPC error codes.
pub const RPC_WIRE_BASE: u64 = 0x100;

/// Converter used by RPC connections: codes live at [`RPC_WIRE_BASE`] and above.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcErrorCodes;

impl ErrorCodeConverter for RpcErrorCodes {
    fn to_wire(&self, code: u64) -> u64 {
        RPC_WIRE_BASE.saturating_add(code)
    }

    fn from_wire(&self, wire: u64) -> u64 {
        wire.checked_sub(RPC_WIRE_BASE)
            .unwrap_or(RpcErrorCode::InternalError.code())
    }

    fn reset_code(&self, reason: ResetReason) -> u64 {
        match reason {
            ResetReason::Cancelled => RpcErrorCode::Canceled.code(),
            ResetReason::Disposed => RpcErrorCode::NoError.code(),
            ResetReason::Refused => RpcErrorCode::Unavailable.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_live_above_base() {
        let codes = RpcErrorCodes;
        assert_eq!(codes.to_wire(RpcErrorCode::Canceled.code()), 0x102);
        assert_eq!(codes.from_wire(0x104), RpcErrorCode::InvalidData.code());
        // codes below the base come from a peer that does not speak RPC codes
        assert_eq!(codes.from_wire(3), RpcErrorCode::InternalError.code());
    }

    #[test]
    fn test_transport_resets_map_to_rpc_codes() {
        let codes = RpcErrorCodes;
        assert_eq!(
            RpcErrorCode::from_code(codes.reset_code(ResetReason::Refused)),
            RpcErrorCode::Unavailable
        );
        assert_eq!(
            RpcErrorCode::from_code(codes.reset_code(ResetReason::Cancelled)),
            RpcErrorCode::Canceled
        );
        assert_eq!(RpcErrorCode::from_code(99), RpcErrorCode::InternalError);
    }

    #[test]
    fn test_status_serializes_by_name() {
        let json = serde_json::to_string(&StatusCode::NotFound).expect("encode");
        assert_eq!(json, "\"NotFound\"");
        assert!(StatusCode::Ok.is_ok());
        assert!(!StatusCode::InternalError.is_ok());
    }
}
