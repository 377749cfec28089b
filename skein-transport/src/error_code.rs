//! Translation between application error codes and wire error codes.

/// Why the transport reset a stream on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// A pending read or write was cancelled.
    Cancelled,
    /// The stream was disposed before both sides completed.
    Disposed,
    /// The peer opened the stream after graceful close began.
    Refused,
}

/// Maps application error codes carried by RESET and CLOSE frames to and from
/// the wire's numeric space.
pub trait ErrorCodeConverter {
    /// Application code to wire code.
    fn to_wire(&self, code: u64) -> u64;

    /// Wire code to application code.
    fn from_wire(&self, wire: u64) -> u64;

    /// Application code used when the transport resets a stream itself.
    fn reset_code(&self, reason: ResetReason) -> u64;
}

/// Identity mapping with a few reserved codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorCodes;

impl DefaultErrorCodes {
    /// No error.
    pub const NO_ERROR: u64 = 0;
    /// An operation was cancelled.
    pub const CANCELLED: u64 = 1;
    /// The stream was refused during graceful close.
    pub const REFUSED: u64 = 2;
    /// The stream was disposed before completion.
    pub const DISPOSED: u64 = 3;
}

impl ErrorCodeConverter for DefaultErrorCodes {
    fn to_wire(&self, code: u64) -> u64 {
        code
    }

    fn from_wire(&self, wire: u64) -> u64 {
        wire
    }

    fn reset_code(&self, reason: ResetReason) -> u64 {
        match reason {
            ResetReason::Cancelled => Self::CANCELLED,
            ResetReason::Disposed => Self::DISPOSED,
            ResetReason::Refused => Self::REFUSED,
        }
    }
}
